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

//! Bridge between the gossip/scheduler layer and the BFT engine.
//!
//! Mirrors the `DecodeProposal` / `Verify` / `Commit` trio the engine calls
//! into, plus the `Message` / `Request` / `AddValidator` / `RemoveValidator`
//! / `ValidatorSet` / `Join` events it emits outward, and owns the FIFO
//! mempool that the scheduler drains when it proposes a block.

use crate::core::consensus::engine::{Engine, EngineError, NoopSlashing};
use crate::core::crypto::{recover_address, CryptoError};
use crate::core::types::{
    decode_canonical_limited, Address, Block, CodecError, Commit, Proposal, Transaction,
    ValidatorSet, Vote,
};
use thiserror::Error;

const MAX_PROPOSAL_BYTES: usize = 8 * 1024 * 1024;

/// Adapter errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Proposal bytes failed to decode, or tagged an unknown proposal type.
    #[error("unknown or malformed proposal")]
    UnknownProposal,
    /// A transaction inside the proposal does not carry a valid signature.
    #[error("invalid transaction signature")]
    InvalidTransactionSignature,
    /// The block's parent hash does not match the adapter's expected parent.
    #[error("unexpected parent hash")]
    UnexpectedParent,
    /// The block's height is not exactly one past the expected parent.
    #[error("unexpected height")]
    UnexpectedHeight,
    /// Underlying engine rejected a vote or commit.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<CodecError> for AdapterError {
    fn from(_: CodecError) -> Self {
        AdapterError::UnknownProposal
    }
}

impl From<CryptoError> for AdapterError {
    fn from(_: CryptoError) -> Self {
        AdapterError::InvalidTransactionSignature
    }
}

/// Outward-facing events the engine/gossip layer feeds into the adapter.
pub enum AdapterEvent {
    /// A consensus wire message (vote or commit) arrived from a peer.
    Message(crate::core::types::ConsensusMsg),
    /// A new block proposal to validate and vote on.
    Request(Block),
    /// A validator was added to the authority set.
    AddValidator(Address),
    /// A validator was removed from the authority set.
    RemoveValidator(Address),
    /// The full validator set was replaced (e.g. on genesis load).
    ValidatorSet(ValidatorSet),
    /// A peer announced itself to the network.
    Join(Address),
}

/// Bridges gossip/scheduler and the BFT engine; owns the FIFO mempool and
/// the current validator set.
pub struct ConsensusAdapter {
    engine: Engine<NoopSlashing>,
    validators: ValidatorSet,
    mempool: Vec<Transaction>,
}

impl ConsensusAdapter {
    /// Build an adapter over the genesis validator set.
    pub fn new(validators: ValidatorSet) -> Self {
        let engine = Engine::new(validators.as_slice().to_vec(), NoopSlashing);
        Self {
            engine,
            validators,
            mempool: Vec::new(),
        }
    }

    /// Current validator set.
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Decode a wire-level proposal payload.
    pub fn decode_proposal(bytes: &[u8]) -> Result<Proposal, AdapterError> {
        decode_canonical_limited(bytes, MAX_PROPOSAL_BYTES).map_err(|_| AdapterError::UnknownProposal)
    }

    /// Structurally validate a proposal against the expected parent/height,
    /// and check every transaction's signature recovers to its claimed
    /// sender. Insufficient balance is **not** a verification failure — it
    /// is resolved at commit time as a failed receipt.
    pub fn verify(
        &self,
        proposal: &Proposal,
        expected_parent: crate::core::types::H256,
        expected_height: u64,
    ) -> Result<(), AdapterError> {
        let Proposal::Block(block) = proposal;
        if block.header.height != expected_height {
            return Err(AdapterError::UnexpectedHeight);
        }
        if block.header.parent_hash != expected_parent {
            return Err(AdapterError::UnexpectedParent);
        }
        for tx in &block.transactions {
            let msg = tx.signing_bytes()?;
            let recovered = recover_address(&msg, &tx.signature)?;
            if recovered != tx.from {
                return Err(AdapterError::InvalidTransactionSignature);
            }
        }
        Ok(())
    }

    /// Verify and fold an inbound vote; returns `Some(Commit)` the instant a
    /// supermajority is reached for its `(height, round, block_hash)`.
    pub fn handle_vote(&mut self, vote: Vote) -> Result<Option<Commit>, AdapterError> {
        Ok(self.engine.process_vote_verified(vote)?)
    }

    /// Verify a commit broadcast from a peer (e.g. one that proposed/voted
    /// before this node caught up).
    pub fn verify_commit(&mut self, commit: &Commit) -> Result<(), AdapterError> {
        self.engine.process_commit_verified(commit)?;
        Ok(())
    }

    /// Drop vote-tracking state for a height once it has been committed to
    /// the chain.
    pub fn prune_up_to(&mut self, height: u64) {
        self.engine.prune_up_to(height);
    }

    /// Append a transaction to the local mempool if not already queued.
    pub fn submit_transaction(&mut self, tx: Transaction) {
        if let Ok(hash) = tx.hash() {
            if self
                .mempool
                .iter()
                .any(|t| matches!(t.hash(), Ok(h) if h == hash))
            {
                return;
            }
        }
        self.mempool.push(tx);
    }

    /// Drain up to `limit` transactions from the front of the mempool to
    /// build a new proposal.
    pub fn drain_mempool_for_proposal(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.iter().take(limit).cloned().collect()
    }

    /// Remove the transactions committed in `committed` from the local
    /// mempool (set difference, grounded in the original `TxDifference`).
    pub fn remove_committed(&mut self, committed: &[Transaction]) {
        let committed_hashes: std::collections::HashSet<_> =
            committed.iter().filter_map(|t| t.hash().ok()).collect();
        self.mempool
            .retain(|t| !matches!(t.hash(), Ok(h) if committed_hashes.contains(&h)));
    }

    /// Apply an `AddValidator`/`RemoveValidator`/`ValidatorSet`/`Join` event.
    pub fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::AddValidator(addr) => {
                self.validators.add(addr);
                self.engine.set_validators(self.validators.as_slice().to_vec());
            }
            AdapterEvent::RemoveValidator(addr) => {
                self.validators.remove(&addr);
                self.engine.set_validators(self.validators.as_slice().to_vec());
            }
            AdapterEvent::ValidatorSet(set) => {
                self.engine.set_validators(set.as_slice().to_vec());
                self.validators = set;
            }
            AdapterEvent::Join(_addr) => {
                // Observational only: the gossip layer already has the
                // connection open; nothing to update here.
            }
            AdapterEvent::Message(_) | AdapterEvent::Request(_) => {
                // Handled by the caller directly (handle_vote / verify),
                // kept here only so AdapterEvent documents the full
                // contract the scheduler dispatches against.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::Keypair;
    use crate::core::types::{Header, H256};

    #[test]
    fn mempool_dedups_by_hash() {
        let kp = Keypair::generate();
        let mut adapter = ConsensusAdapter::new(ValidatorSet::new(vec![kp.address()]));
        let to = Keypair::generate().address();
        let tx = Transaction {
            from: kp.address(),
            to,
            amount: 1,
            signature: kp.sign(b"whatever"),
        };
        adapter.submit_transaction(tx.clone());
        adapter.submit_transaction(tx);
        assert_eq!(adapter.drain_mempool_for_proposal(10).len(), 1);
    }

    #[test]
    fn verify_rejects_wrong_height() {
        let kp = Keypair::generate();
        let adapter = ConsensusAdapter::new(ValidatorSet::new(vec![kp.address()]));
        let block = Block {
            header: Header {
                height: 5,
                parent_hash: H256::ZERO,
                timestamp: 0,
            },
            transactions: vec![],
        };
        let err = adapter
            .verify(&Proposal::Block(block), H256::ZERO, 1)
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnexpectedHeight));
    }

    #[test]
    fn verify_rejects_forged_transaction_signature() {
        let kp = Keypair::generate();
        let adapter = ConsensusAdapter::new(ValidatorSet::new(vec![kp.address()]));
        let other = Keypair::generate();
        let block = Block {
            header: Header {
                height: 1,
                parent_hash: H256::ZERO,
                timestamp: 0,
            },
            transactions: vec![Transaction {
                from: kp.address(),
                to: other.address(),
                amount: 1,
                signature: other.sign(b"not the real payload"),
            }],
        };
        let err = adapter
            .verify(&Proposal::Block(block), H256::ZERO, 1)
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidTransactionSignature));
    }

    #[test]
    fn committed_transactions_are_removed_from_mempool() {
        let kp = Keypair::generate();
        let mut adapter = ConsensusAdapter::new(ValidatorSet::new(vec![kp.address()]));
        let to = Keypair::generate().address();
        let tx = Transaction {
            from: kp.address(),
            to,
            amount: 1,
            signature: kp.sign(b"x"),
        };
        adapter.submit_transaction(tx.clone());
        adapter.remove_committed(&[tx]);
        assert!(adapter.drain_mempool_for_proposal(10).is_empty());
    }
}
