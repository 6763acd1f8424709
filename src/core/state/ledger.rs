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
#![warn(missing_docs)]

//! Deterministic in-memory balance ledger.
//!
//! [`LedgerState`] holds no persistent state of its own; it is rebuilt by
//! replaying every block in the chain store at startup, and mutated only
//! from the block-commit path.

use crate::core::types::{Block, Receipt, TxStatus};
use std::collections::BTreeMap;

/// The address that may mint value: any transaction sent *from* this address
/// credits the recipient unconditionally and is never debited.
pub const ROOT_ADDRESS: crate::core::types::Address = crate::core::types::Address::ZERO;

/// Demurrage is applied every `DEMURRAGE_INTERVAL` blocks...
pub const DEMURRAGE_INTERVAL: u64 = 4320;
/// ...at this divisor (balance / DEMURRAGE_DIVISOR is subtracted, floored at zero).
pub const DEMURRAGE_DIVISOR: u128 = 3000;

/// Balances keyed by address, rebuilt deterministically from the chain.
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    balances: BTreeMap<crate::core::types::Address, u128>,
}

impl LedgerState {
    /// An empty ledger (genesis).
    pub fn new() -> Self {
        Self {
            balances: BTreeMap::new(),
        }
    }

    /// Current balance of `addr`, defaulting to zero.
    pub fn get_balance(&self, addr: &crate::core::types::Address) -> u128 {
        self.balances.get(addr).copied().unwrap_or(0)
    }

    /// Apply every transaction in `block` in order, returning one receipt per
    /// transaction, then apply demurrage if `block.header.height` lands on a
    /// demurrage boundary.
    ///
    /// Sending from [`ROOT_ADDRESS`] always succeeds (mint: the recipient is
    /// credited, nothing is debited). Any other sender must have a balance
    /// `>= amount`; otherwise the transaction fails with no state change —
    /// insufficient balance is recorded as a failed receipt, not an error.
    pub fn process_block(&mut self, block: &Block) -> Vec<Receipt> {
        let mut receipts = Vec::with_capacity(block.transactions.len());

        for tx in &block.transactions {
            let tx_hash = match tx.hash() {
                Ok(h) => h,
                Err(_) => {
                    receipts.push(Receipt {
                        tx_hash: crate::core::types::H256::ZERO,
                        status: TxStatus::Failed,
                    });
                    continue;
                }
            };

            let status = if tx.from == ROOT_ADDRESS {
                self.credit(&tx.to, tx.amount);
                TxStatus::Succeeded
            } else if self.get_balance(&tx.from) >= tx.amount {
                self.debit(&tx.from, tx.amount);
                self.credit(&tx.to, tx.amount);
                TxStatus::Succeeded
            } else {
                TxStatus::Failed
            };

            receipts.push(Receipt { tx_hash, status });
        }

        let height = block.header.height;
        if height > 0 && height % DEMURRAGE_INTERVAL == 0 {
            self.apply_demurrage();
        }

        receipts
    }

    fn credit(&mut self, addr: &crate::core::types::Address, amount: u128) {
        *self.balances.entry(*addr).or_insert(0) += amount;
    }

    fn debit(&mut self, addr: &crate::core::types::Address, amount: u128) {
        let bal = self.balances.entry(*addr).or_insert(0);
        *bal -= amount;
    }

    fn apply_demurrage(&mut self) {
        for (addr, bal) in self.balances.iter_mut() {
            if *addr == ROOT_ADDRESS {
                continue;
            }
            *bal -= *bal / DEMURRAGE_DIVISOR;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Address, Block, Header, Signature, Transaction, H256};

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn block_with_txs(height: u64, txs: Vec<Transaction>) -> Block {
        Block {
            header: Header {
                height,
                parent_hash: H256::ZERO,
                timestamp: 0,
            },
            transactions: txs,
        }
    }

    fn tx(from: Address, to: Address, amount: u128) -> Transaction {
        Transaction {
            from,
            to,
            amount,
            signature: Signature(vec![0u8; 65]),
        }
    }

    #[test]
    fn mint_from_root_always_succeeds() {
        let mut ledger = LedgerState::new();
        let alice = addr(1);
        let block = block_with_txs(1, vec![tx(ROOT_ADDRESS, alice, 100)]);
        let receipts = ledger.process_block(&block);
        assert_eq!(receipts[0].status, TxStatus::Succeeded);
        assert_eq!(ledger.get_balance(&alice), 100);
    }

    #[test]
    fn insufficient_balance_fails_without_state_change() {
        let mut ledger = LedgerState::new();
        let alice = addr(1);
        let bob = addr(2);
        let block = block_with_txs(1, vec![tx(alice, bob, 50)]);
        let receipts = ledger.process_block(&block);
        assert_eq!(receipts[0].status, TxStatus::Failed);
        assert_eq!(ledger.get_balance(&alice), 0);
        assert_eq!(ledger.get_balance(&bob), 0);
    }

    #[test]
    fn debit_credit_transfers_exact_amount() {
        let mut ledger = LedgerState::new();
        let alice = addr(1);
        let bob = addr(2);
        ledger.process_block(&block_with_txs(1, vec![tx(ROOT_ADDRESS, alice, 100)]));
        let receipts = ledger.process_block(&block_with_txs(2, vec![tx(alice, bob, 40)]));
        assert_eq!(receipts[0].status, TxStatus::Succeeded);
        assert_eq!(ledger.get_balance(&alice), 60);
        assert_eq!(ledger.get_balance(&bob), 40);
    }

    #[test]
    fn demurrage_applies_on_interval_boundary_and_exempts_root() {
        let mut ledger = LedgerState::new();
        let alice = addr(1);
        ledger.process_block(&block_with_txs(1, vec![tx(ROOT_ADDRESS, alice, 3000)]));
        let receipts = ledger.process_block(&block_with_txs(DEMURRAGE_INTERVAL, vec![]));
        assert!(receipts.is_empty());
        assert_eq!(ledger.get_balance(&alice), 3000 - 3000 / DEMURRAGE_DIVISOR);
        assert_eq!(ledger.get_balance(&ROOT_ADDRESS), 0);
    }

    #[test]
    fn demurrage_does_not_apply_off_boundary() {
        let mut ledger = LedgerState::new();
        let alice = addr(1);
        ledger.process_block(&block_with_txs(1, vec![tx(ROOT_ADDRESS, alice, 3000)]));
        ledger.process_block(&block_with_txs(2, vec![]));
        assert_eq!(ledger.get_balance(&alice), 3000);
    }
}
