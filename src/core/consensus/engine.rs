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
#![deny(missing_docs)]

//! BFT-lite finality gadget: vote accumulation, double-vote detection, and
//! 2/3+1 commit construction. This is the engine the rest of the node treats
//! as a black box through [`crate::core::consensus::adapter::ConsensusAdapter`].

use crate::core::consensus::signing::vote_signing_bytes;
use crate::core::crypto::{verify_address, CryptoError};
use crate::core::types::{Address, CanonicalMap, Commit, H256, Signature, Vote};
use std::collections::BTreeMap;
use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Voter is not a member of the current validator set.
    #[error("unknown validator")]
    UnknownValidator,
    /// Signature did not recover to the claimed voter.
    #[error("invalid signature")]
    BadSignature,
    /// The same validator voted for two different hashes in one (height, round).
    #[error("double vote detected")]
    DoubleVote,
    /// A commit did not carry enough valid signatures for the current threshold.
    #[error("insufficient votes for commit")]
    NotEnoughVotes,
}

impl From<CryptoError> for EngineError {
    fn from(_: CryptoError) -> Self {
        EngineError::BadSignature
    }
}

/// Slashing hook, invoked on provable misbehavior.
pub trait Slashing: Send + Sync {
    /// Called when a double vote is detected.
    fn on_double_vote(&self, offender: &Address);
}

/// No-op slashing (default): spec.md treats variable validator weights and
/// penalties as out of scope, but the hook point is kept for parity with the
/// engine this module is grounded on.
#[derive(Clone)]
pub struct NoopSlashing;

impl Slashing for NoopSlashing {
    fn on_double_vote(&self, _offender: &Address) {}
}

type VoteMap = BTreeMap<Address, (H256, Signature)>;

/// BFT-lite finalizer state, parameterized over a validator set snapshot.
pub struct Engine<S: Slashing> {
    validators: Vec<Address>,
    slashing: S,
    // votes[height][round] = { voter -> (block_hash, sig) }
    votes: BTreeMap<u64, BTreeMap<u64, VoteMap>>,
}

impl<S: Slashing> Engine<S> {
    /// Create a new engine over `validators` (insertion order does not matter
    /// here; only membership and count).
    pub fn new(validators: Vec<Address>, slashing: S) -> Self {
        Self {
            validators,
            slashing,
            votes: BTreeMap::new(),
        }
    }

    /// Replace the validator set (e.g. after `AddValidator`/`RemoveValidator`).
    pub fn set_validators(&mut self, validators: Vec<Address>) {
        self.validators = validators;
    }

    fn threshold(&self) -> usize {
        (2 * self.validators.len()) / 3 + 1
    }

    /// Verify a vote's signature and, on success, fold it into the tally.
    /// Returns `Some(Commit)` the first time the threshold is crossed for a
    /// given `(height, round, block_hash)`.
    pub fn process_vote_verified(&mut self, v: Vote) -> Result<Option<Commit>, EngineError> {
        if !self.validators.contains(&v.voter) {
            return Err(EngineError::UnknownValidator);
        }
        let msg = vote_signing_bytes(v.height, v.round, v.block_hash, &v.voter);
        if !verify_address(&msg, &v.signature, &v.voter)? {
            return Err(EngineError::BadSignature);
        }
        self.process_vote_inner(v)
    }

    /// Verify a commit's signatures meet the current supermajority threshold.
    pub fn process_commit_verified(&mut self, c: &Commit) -> Result<(), EngineError> {
        for voter in c.signatures.keys() {
            if !self.validators.contains(voter) {
                return Err(EngineError::UnknownValidator);
            }
        }
        if c.signatures.len() < self.threshold() {
            return Err(EngineError::NotEnoughVotes);
        }
        for (voter, sig) in c.signatures.iter() {
            let msg = vote_signing_bytes(c.height, c.round, c.block_hash, voter);
            if !verify_address(&msg, sig, voter)? {
                return Err(EngineError::BadSignature);
            }
        }
        Ok(())
    }

    fn process_vote_inner(&mut self, v: Vote) -> Result<Option<Commit>, EngineError> {
        let height_votes = self.votes.entry(v.height).or_default();
        let round_votes = height_votes.entry(v.round).or_default();

        if let Some((prev_hash, _prev_sig)) = round_votes.get(&v.voter) {
            if *prev_hash != v.block_hash {
                self.slashing.on_double_vote(&v.voter);
                return Err(EngineError::DoubleVote);
            }
            return Ok(None); // duplicate of an already-seen vote
        }

        round_votes.insert(v.voter, (v.block_hash, v.signature.clone()));
        Ok(self.try_build_commit(v.height, v.round))
    }

    fn try_build_commit(&self, height: u64, round: u64) -> Option<Commit> {
        let hm = self.votes.get(&height)?;
        let rm = hm.get(&round)?;

        let mut counts: BTreeMap<H256, usize> = BTreeMap::new();
        for (hash, _sig) in rm.values() {
            *counts.entry(*hash).or_insert(0) += 1;
        }

        let threshold = self.threshold();
        for (hash, count) in counts.iter() {
            if *count >= threshold {
                let mut sigs: CanonicalMap<Address, Signature> = CanonicalMap::new();
                for (voter, (vh, vsig)) in rm.iter() {
                    if vh == hash {
                        sigs.insert(*voter, vsig.clone());
                    }
                }
                return Some(Commit {
                    height,
                    round,
                    block_hash: *hash,
                    signatures: sigs,
                });
            }
        }
        None
    }

    /// Drop all vote state at or below `height` once it has been committed to
    /// the chain; called by the adapter after a successful `Commit` callback.
    pub fn prune_up_to(&mut self, height: u64) {
        self.votes.retain(|h, _| *h > height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::Keypair;

    fn sign_vote(kp: &Keypair, height: u64, round: u64, hash: H256) -> Vote {
        let msg = vote_signing_bytes(height, round, hash, &kp.address());
        Vote {
            height,
            round,
            block_hash: hash,
            voter: kp.address(),
            signature: kp.sign(&msg),
        }
    }

    #[test]
    fn commits_once_supermajority_reached() {
        let kps: Vec<_> = (0..4).map(|_| Keypair::generate()).collect();
        let validators: Vec<_> = kps.iter().map(|k| k.address()).collect();
        let mut engine = Engine::new(validators, NoopSlashing);
        let hash = H256::from_bytes([7u8; 32]);

        let mut commit = None;
        for kp in &kps[..3] {
            let v = sign_vote(kp, 1, 0, hash);
            commit = engine.process_vote_verified(v).unwrap();
        }
        let commit = commit.expect("supermajority of 3-of-4 should commit");
        assert_eq!(commit.signatures.len(), 3);
        engine.process_commit_verified(&commit).unwrap();
    }

    #[test]
    fn double_vote_is_rejected() {
        let kps: Vec<_> = (0..4).map(|_| Keypair::generate()).collect();
        let validators: Vec<_> = kps.iter().map(|k| k.address()).collect();
        let mut engine = Engine::new(validators, NoopSlashing);

        let v1 = sign_vote(&kps[0], 1, 0, H256::from_bytes([1u8; 32]));
        engine.process_vote_verified(v1).unwrap();

        let v2 = sign_vote(&kps[0], 1, 0, H256::from_bytes([2u8; 32]));
        let err = engine.process_vote_verified(v2).unwrap_err();
        assert!(matches!(err, EngineError::DoubleVote));
    }

    #[test]
    fn unknown_validator_rejected() {
        let kps: Vec<_> = (0..4).map(|_| Keypair::generate()).collect();
        let validators: Vec<_> = kps.iter().map(|k| k.address()).collect();
        let mut engine = Engine::new(validators, NoopSlashing);

        let outsider = Keypair::generate();
        let v = sign_vote(&outsider, 1, 0, H256::from_bytes([3u8; 32]));
        let err = engine.process_vote_verified(v).unwrap_err();
        assert!(matches!(err, EngineError::UnknownValidator));
    }
}
