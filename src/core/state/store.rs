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

//! Append-only chain store backed by `sled`.
//!
//! Key schema (byte-for-byte grounded in the original node's `rawdb/schema.go`):
//!
//! | key | value |
//! |---|---|
//! | `"LastBlock"` | head block hash (32 bytes) |
//! | `"h" ‖ be64(height) ‖ hash` | canonically-encoded block |
//! | `"h" ‖ be64(height) ‖ "n"` | canonical hash at `height` |
//! | `"H" ‖ hash` | `be64(height)` (reverse lookup) |
//! | `"r" ‖ be64(height) ‖ hash` | canonically-encoded `Vec<Receipt>` |
//!
//! `ChainStore` is the sole writer of its `sled::Db` handle. Every block
//! write is one `sled` transaction, so the head pointer can never be observed
//! pointing at a block whose body/receipts/height-index are not also present.

use crate::core::types::{decode_canonical_limited, encode_canonical, Block, CodecError, H256, Receipt};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use thiserror::Error;

const HEAD_KEY: &[u8] = b"LastBlock";
const BLOCK_PREFIX: u8 = b'h';
const HASH_SUFFIX: u8 = b'n';
const NUMBER_PREFIX: u8 = b'H';
const RECEIPTS_PREFIX: u8 = b'r';

/// Maximum size of a single stored block or receipt set; generous but bounded
/// so a corrupt or adversarial payload cannot exhaust memory on decode.
const MAX_STORED_OBJECT_BYTES: usize = 64 * 1024 * 1024;

/// Chain store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open the underlying database.
    #[error("db open")]
    DbOpen,
    /// A read or write against the database failed.
    #[error("db io")]
    DbIo,
    /// A multi-key write could not be committed atomically.
    #[error("tx conflict")]
    TxConflict,
    /// A stored value failed to decode.
    #[error("corrupt stored value")]
    Corrupt,
    /// The parent of a block to insert is not the current head.
    #[error("non-contiguous block: expected parent {expected}, got {got}")]
    NonContiguous {
        /// Expected parent hash (current head).
        expected: String,
        /// Parent hash actually carried by the block.
        got: String,
    },
}

impl From<CodecError> for StoreError {
    fn from(_: CodecError) -> Self {
        StoreError::Corrupt
    }
}

fn be64(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn block_hash_key(height: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 8 + 1);
    k.push(BLOCK_PREFIX);
    k.extend_from_slice(&be64(height));
    k.push(HASH_SUFFIX);
    k
}

fn block_key(height: u64, hash: &H256) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 8 + 32);
    k.push(BLOCK_PREFIX);
    k.extend_from_slice(&be64(height));
    k.extend_from_slice(hash.as_bytes());
    k
}

fn number_key(hash: &H256) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 32);
    k.push(NUMBER_PREFIX);
    k.extend_from_slice(hash.as_bytes());
    k
}

fn receipts_key(height: u64, hash: &H256) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 8 + 32);
    k.push(RECEIPTS_PREFIX);
    k.extend_from_slice(&be64(height));
    k.extend_from_slice(hash.as_bytes());
    k
}

/// Append-only, single-writer chain store.
#[derive(Clone)]
pub struct ChainStore {
    db: sled::Db,
}

impl ChainStore {
    /// Open (or create) the store at `path`. Does not synthesize a genesis
    /// block: a node joining an existing network must adopt the genesis it
    /// downloads rather than mint its own (see [`ChainStore::ensure_genesis`]
    /// for the founder path).
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;
        Ok(Self { db })
    }

    /// True iff no block has ever been written to this store.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.head_hash()?.is_none())
    }

    /// If the store has no head yet, synthesize a genesis block at height 0
    /// (zero parent, `timestamp`, empty transaction list) and install it as
    /// head. A no-op if a head already exists. Used only by the node that is
    /// founding a new chain; a joining node instead adopts the genesis it
    /// downloads via [`crate::networking::sync::catch_up`].
    pub fn ensure_genesis(&self, timestamp: u64) -> Result<(), StoreError> {
        if self.is_empty()? {
            self.write_block(&Block::genesis(timestamp), &[])?;
        }
        Ok(())
    }

    /// Hash of the current head block, if any block has been written yet.
    pub fn head_hash(&self) -> Result<Option<H256>, StoreError> {
        let v = self.db.get(HEAD_KEY).map_err(|_| StoreError::DbIo)?;
        Ok(v.map(|iv| {
            let mut h = [0u8; 32];
            h.copy_from_slice(&iv);
            H256::from_bytes(h)
        }))
    }

    /// The current head block, if any.
    pub fn head_block(&self) -> Result<Option<Block>, StoreError> {
        let Some(hash) = self.head_hash()? else {
            return Ok(None);
        };
        let Some(height) = self.height_of(&hash)? else {
            return Ok(None);
        };
        self.block_at(height, &hash)
    }

    /// Canonical hash stored at `height`, if any.
    pub fn hash_at_height(&self, height: u64) -> Result<Option<H256>, StoreError> {
        let v = self
            .db
            .get(block_hash_key(height))
            .map_err(|_| StoreError::DbIo)?;
        Ok(v.map(|iv| {
            let mut h = [0u8; 32];
            h.copy_from_slice(&iv);
            H256::from_bytes(h)
        }))
    }

    /// Height of `hash`, if known.
    pub fn height_of(&self, hash: &H256) -> Result<Option<u64>, StoreError> {
        let v = self
            .db
            .get(number_key(hash))
            .map_err(|_| StoreError::DbIo)?;
        Ok(v.map(|iv| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&iv);
            u64::from_be_bytes(b)
        }))
    }

    /// Fetch the block at `height` with hash `hash`, if present.
    pub fn block_at(&self, height: u64, hash: &H256) -> Result<Option<Block>, StoreError> {
        let v = self
            .db
            .get(block_key(height, hash))
            .map_err(|_| StoreError::DbIo)?;
        v.map(|iv| decode_canonical_limited(&iv, MAX_STORED_OBJECT_BYTES).map_err(StoreError::from))
            .transpose()
    }

    /// Fetch the block by height via the canonical-hash index.
    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let Some(hash) = self.hash_at_height(height)? else {
            return Ok(None);
        };
        self.block_at(height, &hash)
    }

    /// Fetch the receipts recorded for the block at `(height, hash)`.
    pub fn receipts_at(&self, height: u64, hash: &H256) -> Result<Option<Vec<Receipt>>, StoreError> {
        let v = self
            .db
            .get(receipts_key(height, hash))
            .map_err(|_| StoreError::DbIo)?;
        v.map(|iv| decode_canonical_limited(&iv, MAX_STORED_OBJECT_BYTES).map_err(StoreError::from))
            .transpose()
    }

    /// Append `block` (with its already-computed `receipts`) as the new head.
    ///
    /// Writes the body, the height->hash and hash->height indexes, the
    /// receipts, and the head pointer in a single `sled` transaction so the
    /// head can never be observed ahead of the rest of the block's data.
    pub fn write_block(&self, block: &Block, receipts: &[Receipt]) -> Result<(), StoreError> {
        let hash = block.hash()?;
        let height = block.header.height;

        if height > 0 {
            let current_head = self.head_hash()?;
            match current_head {
                Some(head) if head == block.header.parent_hash => {}
                Some(head) => {
                    return Err(StoreError::NonContiguous {
                        expected: head.to_hex(),
                        got: block.header.parent_hash.to_hex(),
                    })
                }
                None => {
                    return Err(StoreError::NonContiguous {
                        expected: H256::ZERO.to_hex(),
                        got: block.header.parent_hash.to_hex(),
                    })
                }
            }
        }

        let block_bytes = encode_canonical(block)?;
        let receipts_bytes = encode_canonical(&receipts.to_vec())?;

        let res: Result<(), TransactionError<StoreError>> = self.db.transaction(|tx| {
            tx.insert(block_key(height, &hash), block_bytes.as_slice())?;
            tx.insert(block_hash_key(height), hash.as_bytes().as_slice())?;
            tx.insert(number_key(&hash), be64(height).as_slice())?;
            tx.insert(receipts_key(height, &hash), receipts_bytes.as_slice())?;
            tx.insert(HEAD_KEY, hash.as_bytes().as_slice())?;
            Ok(())
        });

        match res {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(_)) => Err(StoreError::DbIo),
        }
    }

    /// Insert a contiguous tail of `(block, receipts)` pairs fetched from a
    /// remote peer during catch-up, in order. The first block must link to
    /// the current head; every block after that must link to its
    /// predecessor. `write_block`'s own per-call contiguity check enforces
    /// both, so a violation anywhere in the tail surfaces as `NonContiguous`
    /// and leaves the chain at the last successfully written block.
    pub fn insert_chain(&self, blocks: &[(Block, Vec<Receipt>)]) -> Result<(), StoreError> {
        for (block, receipts) in blocks {
            self.write_block(block, receipts)?;
        }
        Ok(())
    }

    /// Walk back from the current head, deleting the height→hash, body, and
    /// receipt keys for every block of height greater than `h`. If a parent
    /// link is missing partway through the walk, the head is reset to
    /// genesis rather than left pointing at a gap.
    pub fn set_head(&self, h: u64) -> Result<(), StoreError> {
        let Some(mut hash) = self.head_hash()? else {
            return Ok(());
        };
        loop {
            let Some(height) = self.height_of(&hash)? else {
                // Missing parent mid-walk: fall back to genesis.
                return self.reset_head_to(0);
            };
            if height <= h {
                return self.set_head_pointer(height, &hash);
            }
            let Some(block) = self.block_at(height, &hash)? else {
                return self.reset_head_to(0);
            };

            let res: Result<(), TransactionError<StoreError>> = self.db.transaction(|tx| {
                tx.remove(block_key(height, &hash))?;
                tx.remove(block_hash_key(height))?;
                tx.remove(number_key(&hash))?;
                tx.remove(receipts_key(height, &hash))?;
                Ok(())
            });
            match res {
                Ok(()) => {}
                Err(TransactionError::Abort(e)) => return Err(e),
                Err(TransactionError::Storage(_)) => return Err(StoreError::DbIo),
            }

            if height == 0 {
                return self.db.remove(HEAD_KEY).map(|_| ()).map_err(|_| StoreError::DbIo);
            }
            hash = block.header.parent_hash;
        }
    }

    fn set_head_pointer(&self, _height: u64, hash: &H256) -> Result<(), StoreError> {
        self.db
            .insert(HEAD_KEY, hash.as_bytes().as_slice())
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    fn reset_head_to(&self, height: u64) -> Result<(), StoreError> {
        match self.hash_at_height(height)? {
            Some(hash) => self.set_head_pointer(height, &hash),
            None => self.db.remove(HEAD_KEY).map(|_| ()).map_err(|_| StoreError::DbIo),
        }
    }

    /// Replay every stored block from genesis through the current head into
    /// a fresh [`crate::core::state::ledger::LedgerState`], used to rebuild
    /// balances at startup.
    pub fn replay_into_ledger(
        &self,
    ) -> Result<crate::core::state::ledger::LedgerState, StoreError> {
        let mut ledger = crate::core::state::ledger::LedgerState::new();
        let Some(head) = self.head_hash()? else {
            return Ok(ledger);
        };
        let Some(head_height) = self.height_of(&head)? else {
            return Ok(ledger);
        };
        for height in 0..=head_height {
            if let Some(block) = self.block_by_height(height)? {
                ledger.process_block(&block);
            }
        }
        Ok(ledger)
    }
}

impl From<sled::transaction::UnabortableTransactionError> for ConflictableTransactionError<StoreError> {
    fn from(_: sled::transaction::UnabortableTransactionError) -> Self {
        ConflictableTransactionError::Abort(StoreError::DbIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Header;

    fn store() -> ChainStore {
        let dir = tempfile::tempdir().unwrap();
        ChainStore::open(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn genesis_becomes_head() {
        let store = store();
        let genesis = Block::genesis(1000);
        store.write_block(&genesis, &[]).unwrap();
        assert_eq!(store.head_hash().unwrap(), Some(genesis.hash().unwrap()));
        assert_eq!(store.head_block().unwrap().unwrap().header.height, 0);
    }

    #[test]
    fn non_contiguous_block_is_rejected() {
        let store = store();
        let genesis = Block::genesis(1000);
        store.write_block(&genesis, &[]).unwrap();

        let bogus = Block {
            header: Header {
                height: 1,
                parent_hash: H256::from_bytes([9u8; 32]),
                timestamp: 1001,
            },
            transactions: vec![],
        };
        let err = store.write_block(&bogus, &[]).unwrap_err();
        assert!(matches!(err, StoreError::NonContiguous { .. }));
    }

    #[test]
    fn height_and_hash_indexes_agree_after_append() {
        let store = store();
        let genesis = Block::genesis(1000);
        store.write_block(&genesis, &[]).unwrap();
        let genesis_hash = genesis.hash().unwrap();

        let next = Block {
            header: Header {
                height: 1,
                parent_hash: genesis_hash,
                timestamp: 1001,
            },
            transactions: vec![],
        };
        store.write_block(&next, &[]).unwrap();

        assert_eq!(store.height_of(&next.hash().unwrap()).unwrap(), Some(1));
        assert_eq!(
            store.hash_at_height(1).unwrap(),
            Some(next.hash().unwrap())
        );
        assert_eq!(store.head_hash().unwrap(), Some(next.hash().unwrap()));
    }

    #[test]
    fn ensure_genesis_is_a_noop_on_a_nonempty_store() {
        let store = store();
        let genesis = Block::genesis(1000);
        store.write_block(&genesis, &[]).unwrap();
        store.ensure_genesis(9999).unwrap();
        assert_eq!(store.head_hash().unwrap(), Some(genesis.hash().unwrap()));
    }

    #[test]
    fn ensure_genesis_synthesizes_on_an_empty_store() {
        let store = store();
        assert!(store.is_empty().unwrap());
        store.ensure_genesis(1000).unwrap();
        let head = store.head_block().unwrap().unwrap();
        assert_eq!(head.header.height, 0);
        assert!(head.header.parent_hash.is_zero());
    }

    #[test]
    fn set_head_walks_back_and_deletes_later_blocks() {
        let store = store();
        let genesis = Block::genesis(1000);
        store.write_block(&genesis, &[]).unwrap();
        let genesis_hash = genesis.hash().unwrap();
        let next = Block {
            header: Header {
                height: 1,
                parent_hash: genesis_hash,
                timestamp: 1001,
            },
            transactions: vec![],
        };
        store.write_block(&next, &[]).unwrap();

        store.set_head(0).unwrap();
        assert_eq!(store.head_hash().unwrap(), Some(genesis_hash));
        assert!(store.block_by_height(1).unwrap().is_none());
        assert_eq!(store.height_of(&next.hash().unwrap()).unwrap(), None);
    }

    #[test]
    fn replay_rebuilds_ledger_from_stored_blocks() {
        let store = store();
        let genesis = Block::genesis(1000);
        store.write_block(&genesis, &[]).unwrap();

        let ledger = store.replay_into_ledger().unwrap();
        assert_eq!(
            ledger.get_balance(&crate::core::state::ledger::ROOT_ADDRESS),
            0
        );
    }
}
