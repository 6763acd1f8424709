// Copyright (c) 2026 Poa Ledger Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

use poa_ledger::core::types::{
    decode_canonical_limited, encode_canonical, Address, Block, Header, Receipt, Signature,
    Transaction, TxStatus, H256,
};
use proptest::prelude::*;

const MAX: usize = 1 << 20;

fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from_bytes)
}

fn arb_hash() -> impl Strategy<Value = H256> {
    any::<[u8; 32]>().prop_map(H256::from_bytes)
}

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (arb_address(), arb_address(), any::<u64>(), any::<Vec<u8>>()).prop_map(
        |(from, to, amount, sig)| Transaction {
            from,
            to,
            amount: amount as u128,
            signature: Signature(sig),
        },
    )
}

proptest! {
    #[test]
    fn prop_transaction_roundtrips(tx in arb_transaction()) {
        let bytes = encode_canonical(&tx).unwrap();
        let back: Transaction = decode_canonical_limited(&bytes, MAX).unwrap();
        prop_assert_eq!(back.from, tx.from);
        prop_assert_eq!(back.to, tx.to);
        prop_assert_eq!(back.amount, tx.amount);
        prop_assert_eq!(back.signature.0, tx.signature.0);
    }

    #[test]
    fn prop_header_roundtrips(height in any::<u64>(), parent in arb_hash(), ts in any::<u64>()) {
        let header = Header { height, parent_hash: parent, timestamp: ts };
        let bytes = encode_canonical(&header).unwrap();
        let back: Header = decode_canonical_limited(&bytes, MAX).unwrap();
        prop_assert_eq!(back, header);
    }

    #[test]
    fn prop_block_roundtrips(height in any::<u64>(), parent in arb_hash(), ts in any::<u64>(), txs in prop::collection::vec(arb_transaction(), 0..8)) {
        let block = Block { header: Header { height, parent_hash: parent, timestamp: ts }, transactions: txs };
        let bytes = encode_canonical(&block).unwrap();
        let back: Block = decode_canonical_limited(&bytes, MAX).unwrap();
        prop_assert_eq!(back.header, block.header);
        prop_assert_eq!(back.transactions.len(), block.transactions.len());
    }

    #[test]
    fn prop_receipt_roundtrips(hash in arb_hash(), succeeded in any::<bool>()) {
        let status = if succeeded { TxStatus::Succeeded } else { TxStatus::Failed };
        let receipt = Receipt { tx_hash: hash, status };
        let bytes = encode_canonical(&receipt).unwrap();
        let back: Receipt = decode_canonical_limited(&bytes, MAX).unwrap();
        prop_assert_eq!(back.tx_hash, receipt.tx_hash);
        prop_assert_eq!(back.status, receipt.status);
    }

    #[test]
    fn prop_identical_values_encode_identically(tx in arb_transaction()) {
        let a = encode_canonical(&tx).unwrap();
        let b = encode_canonical(&tx).unwrap();
        prop_assert_eq!(a, b);
    }
}
