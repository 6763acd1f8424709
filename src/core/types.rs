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

//! Deterministic core types and canonical encoding helpers.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized under the canonical rules.
    #[error("serialization")]
    Serialize,
    /// The bytes did not decode to a well-formed value.
    #[error("deserialization")]
    Deserialize,
    /// The payload exceeded the caller-supplied size cap.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation; identical
    // logical values must produce identical bytes on every node.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering (use BTreeMap/BTreeSet).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    // Fast-path cap on the raw wire payload.
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // Defensive cap inside the deserializer to prevent memory/CPU bombs via large container lengths.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Hash an already-canonically-encoded value with Keccak-256.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// `Hash(x) := Keccak-256(encode_canonical(x))`.
pub fn hash_of<T: Serialize>(v: &T) -> Result<H256, CodecError> {
    let bytes = encode_canonical(v)?;
    Ok(H256(keccak256(&bytes)))
}

/// 256-bit hash type (32 bytes).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct H256([u8; 32]);

impl H256 {
    /// The all-zero hash; used as the genesis parent hash.
    pub const ZERO: H256 = H256([0u8; 32]);

    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }
    /// Return bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    /// True iff all bytes are zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
    /// Hex string (no 0x prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for H256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "H256({})", self.to_hex())
    }
}

/// 20-byte address derived from a public key.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address, used for zero-valued fields.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }
    /// Return bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
    /// Parse from a hex string (with or without leading `0x`).
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 20 {
            return None;
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Some(Self(out))
    }
    /// Hex string (no 0x prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 65-byte recoverable ECDSA signature (r(32) || s(32) || recovery_id(1)).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

/// Canonical map type alias (deterministic iteration order).
pub type CanonicalMap<K, V> = BTreeMap<K, V>;

/// Transaction status recorded in a receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// The transfer (or mint) was applied.
    Succeeded,
    /// The sender's balance was insufficient; no state change occurred.
    Failed,
}

/// A signed value transfer between two addresses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address.
    pub from: Address,
    /// Receiver address.
    pub to: Address,
    /// Amount to transfer (non-negative).
    pub amount: u128,
    /// Signature recovering to `from` over the canonical encoding of the
    /// transaction with `signature` held empty.
    pub signature: Signature,
}

impl Transaction {
    /// The canonical bytes a signature is produced over: the transaction with
    /// its signature field cleared.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let unsigned = UnsignedTransaction {
            from: self.from,
            to: self.to,
            amount: self.amount,
        };
        encode_canonical(&unsigned)
    }

    /// Hash of the transaction (used for receipts and mempool dedup).
    pub fn hash(&self) -> Result<H256, CodecError> {
        hash_of(self)
    }
}

/// The signable projection of a transaction (signature omitted).
#[derive(Clone, Serialize, Deserialize)]
struct UnsignedTransaction {
    from: Address,
    to: Address,
    amount: u128,
}

/// Block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block height; 0 is genesis.
    pub height: u64,
    /// Hash of the parent block; zero iff height == 0.
    pub parent_hash: H256,
    /// Wall-clock seconds since the UNIX epoch at creation time.
    pub timestamp: u64,
}

/// A block: header plus an ordered list of transactions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: Header,
    /// Transactions in commit order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Deterministic hash of the block under canonical encoding.
    pub fn hash(&self) -> Result<H256, CodecError> {
        hash_of(self)
    }

    /// Build the genesis block (height 0, zero parent).
    pub fn genesis(timestamp: u64) -> Self {
        Self {
            header: Header {
                height: 0,
                parent_hash: H256::ZERO,
                timestamp,
            },
            transactions: Vec::new(),
        }
    }
}

/// One receipt per transaction, in block order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction this receipt covers.
    pub tx_hash: H256,
    /// Outcome of applying the transaction.
    pub status: TxStatus,
}

/// Ordered, non-empty, deduplicated set of authorized validators.
///
/// Order is insertion order and must be identical across nodes: it is the
/// basis for round-robin proposer selection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    members: Vec<Address>,
}

impl ValidatorSet {
    /// Build a validator set from an ordered list, de-duplicating while
    /// preserving first-seen order.
    pub fn new(members: Vec<Address>) -> Self {
        let mut seen = std::collections::HashSet::with_capacity(members.len());
        let mut out = Vec::with_capacity(members.len());
        for m in members {
            if seen.insert(m) {
                out.push(m);
            }
        }
        Self { members: out }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True iff the set has no validators.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The validator at `index % len()`. Panics if the set is empty.
    pub fn at_cursor(&self, cursor: u64) -> Address {
        let i = (cursor as usize) % self.members.len();
        self.members[i]
    }

    /// Index of `addr` in the ordered set, if present.
    pub fn index_of(&self, addr: &Address) -> Option<usize> {
        self.members.iter().position(|m| m == addr)
    }

    /// True iff `addr` is a member.
    pub fn contains(&self, addr: &Address) -> bool {
        self.members.iter().any(|m| m == addr)
    }

    /// Append a validator if not already present (preserves insertion order).
    pub fn add(&mut self, addr: Address) {
        if !self.contains(&addr) {
            self.members.push(addr);
        }
    }

    /// Remove a validator if present.
    pub fn remove(&mut self, addr: &Address) {
        self.members.retain(|m| m != addr);
    }

    /// Iterate members in order.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }

    /// Borrow the underlying ordered slice.
    pub fn as_slice(&self) -> &[Address] {
        &self.members
    }
}

/// `(sequence, round)` pair identifying a consensus attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct View {
    /// Height being decided.
    pub sequence: u64,
    /// Retry-within-height counter.
    pub round: u64,
}

/// A consensus vote on a candidate block hash for a given view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
    /// Block height.
    pub height: u64,
    /// Consensus round (height-bound).
    pub round: u64,
    /// Voted block hash.
    pub block_hash: H256,
    /// Voter address.
    pub voter: Address,
    /// Signature over the domain-separated vote bytes.
    pub signature: Signature,
}

/// Commit message proving finality: a supermajority of votes for one hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    /// Height.
    pub height: u64,
    /// Round.
    pub round: u64,
    /// Finalized block hash.
    pub block_hash: H256,
    /// Signatures by validators, keyed by address for canonical ordering.
    pub signatures: CanonicalMap<Address, Signature>,
}

/// Proposal decoded from an engine `Request`/`Message` payload.
///
/// The source protocol tags proposals with a leading type byte; only the
/// block variant is defined today. Unknown tags are rejected with
/// `UnknownProposal` by the adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Proposal {
    /// A candidate block.
    Block(Block),
}

/// Wire-level consensus engine messages relayed over gossip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConsensusMsg {
    /// Vote broadcast.
    Vote(Vote),
    /// Commit broadcast.
    Commit(Commit),
}

/// Gossip wire envelope: every payload the consensus adapter broadcasts or
/// receives is `(type_tag, body)`, canonically encoded as a single unit
/// before being handed to the gossip overlay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Discriminates the shape of `body`.
    pub type_tag: u32,
    /// Canonically-encoded payload specific to `type_tag`.
    pub body: Vec<u8>,
}

/// `body` is a canonical-encoded [`ConsensusMsg`] (vote or commit).
pub const TAG_CONSENSUS_MESSAGE: u32 = 0;
/// `body` is a canonical-encoded [`Proposal`].
pub const TAG_REQUEST: u32 = 1;
/// `body` carries backlogged engine state; unused by this implementation.
pub const TAG_BACKLOG: u32 = 2;
/// `body` is a canonical-encoded [`Address`] announcing a new peer.
pub const TAG_JOIN: u32 = 3;
/// `body` carries sync-service state; unused on the gossip path (see the
/// HTTP `/state` surface instead).
pub const TAG_STATE: u32 = 4;
/// `body` is a canonical-encoded [`ValidatorSetGift`].
pub const TAG_VALIDATOR_SET: u32 = 5;
/// `body` is a canonical-encoded [`Address`] to remove from the validator set.
pub const TAG_REMOVE_VALIDATOR: u32 = 6;
/// Reserved for engine-defined extensions.
pub const TAG_CUSTOM: u32 = 7;

/// A `ValidatorSet` gift unicast (over the broadcast gossip overlay) to a
/// specific joining peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorSetGift {
    /// The full validator set being handed to `dest`.
    pub set: ValidatorSet,
    /// The joining node this gift targets.
    pub dest: Address,
}

/// Node configuration root (deserialized from TOML).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node settings.
    pub node: NodeSettings,
    /// HTTP endpoints.
    pub http: HttpConfig,
    /// Gossip settings.
    pub gossip: GossipConfig,
    /// Consensus settings.
    pub consensus: ConsensusConfig,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (db + keys).
    pub data_dir: String,
}

/// HTTP config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. `0.0.0.0:9090`.
    pub listen_addr: String,
}

/// Gossip overlay config embedded in node config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Local TCP listen address, e.g. `0.0.0.0:30303`.
    pub listen_addr: String,
    /// Peers to dial at startup.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Maximum number of distinct message digests remembered globally.
    #[serde(default = "default_known_cap")]
    pub known_cap: usize,
    /// Maximum number of distinct message digests remembered per peer.
    #[serde(default = "default_per_peer_cap")]
    pub per_peer_cap: usize,
}

fn default_known_cap() -> usize {
    1024
}
fn default_per_peer_cap() -> usize {
    1024
}

/// Consensus config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Validator addresses in hex (20 bytes each), in genesis order.
    pub validators_hex: Vec<String>,
    /// Milliseconds between proposer mining attempts once it is this node's turn.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
    /// Milliseconds to wait for a commit before rotating the signer cursor.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Milliseconds of total commit silence before triggering resync.
    #[serde(default = "default_desync_interval_ms")]
    pub desync_interval_ms: u64,
    /// Remote `/state` endpoints to catch up from.
    #[serde(default)]
    pub sync_peers: Vec<String>,
}

fn default_block_interval_ms() -> u64 {
    10_000
}
fn default_block_timeout_ms() -> u64 {
    20_000
}
fn default_desync_interval_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let h1 = keccak256(b"hello");
        let h2 = keccak256(b"hello");
        assert_eq!(h1, h2);
    }

    #[test]
    fn validator_set_dedups_preserving_order() {
        let a = Address::from_bytes([1u8; 20]);
        let b = Address::from_bytes([2u8; 20]);
        let vs = ValidatorSet::new(vec![a, b, a]);
        assert_eq!(vs.len(), 2);
        assert_eq!(vs.as_slice(), &[a, b]);
    }

    #[test]
    fn at_cursor_wraps_with_modulo() {
        let a = Address::from_bytes([1u8; 20]);
        let b = Address::from_bytes([2u8; 20]);
        let vs = ValidatorSet::new(vec![a, b]);
        assert_eq!(vs.at_cursor(0), a);
        assert_eq!(vs.at_cursor(1), b);
        assert_eq!(vs.at_cursor(2), a);
        assert_eq!(vs.at_cursor(3), b);
    }

    #[test]
    fn transaction_roundtrip_through_canonical_codec() {
        let tx = Transaction {
            from: Address::from_bytes([1u8; 20]),
            to: Address::from_bytes([2u8; 20]),
            amount: 42,
            signature: Signature(vec![0u8; 65]),
        };
        let bytes = encode_canonical(&tx).unwrap();
        let back: Transaction = decode_canonical_limited(&bytes, 1 << 20).unwrap();
        assert_eq!(back.from, tx.from);
        assert_eq!(back.to, tx.to);
        assert_eq!(back.amount, tx.amount);
    }

    #[test]
    fn block_roundtrip_through_canonical_codec() {
        let b = Block::genesis(1234);
        let bytes = encode_canonical(&b).unwrap();
        let back: Block = decode_canonical_limited(&bytes, 1 << 20).unwrap();
        assert_eq!(back.header, b.header);
    }

    #[test]
    fn genesis_has_zero_parent_hash() {
        let g = Block::genesis(1);
        assert!(g.header.parent_hash.is_zero());
        assert_eq!(g.header.height, 0);
    }

    #[test]
    fn decode_rejects_oversized_payload() {
        let bytes = encode_canonical(&Block::genesis(1)).unwrap();
        let res: Result<Block, _> = decode_canonical_limited(&bytes, 4);
        assert!(res.is_err());
    }

    #[test]
    fn wire_envelope_roundtrips_a_validator_set_gift() {
        let a = Address::from_bytes([1u8; 20]);
        let b = Address::from_bytes([2u8; 20]);
        let gift = ValidatorSetGift {
            set: ValidatorSet::new(vec![a, b]),
            dest: b,
        };
        let body = encode_canonical(&gift).unwrap();
        let envelope = WireEnvelope {
            type_tag: TAG_VALIDATOR_SET,
            body,
        };
        let bytes = encode_canonical(&envelope).unwrap();
        let back: WireEnvelope = decode_canonical_limited(&bytes, 1 << 20).unwrap();
        assert_eq!(back.type_tag, TAG_VALIDATOR_SET);
        let back_gift: ValidatorSetGift = decode_canonical_limited(&back.body, 1 << 20).unwrap();
        assert_eq!(back_gift.dest, b);
        assert_eq!(back_gift.set.as_slice(), &[a, b]);
    }
}
