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
#![allow(missing_docs)]

//! The single event-loop task: owns the validator set, mempool, signer
//! cursor, and timers, and is the only place any of them is mutated.
//!
//! Grounded in `original_source/currency/currency.go`'s `Commit` sequencing
//! (apply to ledger, persist, prune mempool, rearm timers, advance cursor)
//! and `original_source/backend/network/manager.go`'s wire-envelope
//! dispatch; wires together the gossip overlay, consensus adapter,
//! scheduler/timers, chain store, and sync HTTP surface built elsewhere in
//! this crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::consensus::adapter::{AdapterEvent, ConsensusAdapter};
use crate::core::consensus::signing::vote_signing_bytes;
use crate::core::scheduler::{Scheduler, TimerEvent, TimerSet};
use crate::core::security::keystore::{FileSecp256k1Backend, Keystore};
use crate::core::state::ledger::LedgerState;
use crate::core::state::store::ChainStore;
use crate::core::types::{
    decode_canonical_limited, encode_canonical, Address, Block, ConsensusMsg, Header, NodeConfig,
    Proposal, Transaction, ValidatorSet, ValidatorSetGift, Vote, WireEnvelope, H256,
    TAG_CONSENSUS_MESSAGE, TAG_JOIN, TAG_REMOVE_VALIDATOR, TAG_REQUEST, TAG_VALIDATOR_SET,
};
use crate::monitoring::metrics::Metrics;
use crate::networking::gossip::{self, GossipConfig, GossipEvent, GossipHandle};
use crate::networking::sync::{self, SyncState};

const MAX_ENVELOPE_BYTES: usize = 16 * 1024 * 1024;
const MEMPOOL_DRAIN_LIMIT: usize = 4096;

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn parse_validators(hex_addrs: &[String]) -> anyhow::Result<Vec<Address>> {
    hex_addrs
        .iter()
        .map(|s| Address::from_hex(s).with_context(|| format!("malformed validator address {s}")))
        .collect()
}

/// Build every subsystem from `config`, then run the event loop until
/// Ctrl-C. `wallet_path` overrides the default `data_dir/validator.key`
/// location (the `-w` flag).
pub async fn run(config: NodeConfig, wallet_path: Option<String>) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new().map_err(|_| anyhow::anyhow!("metrics init failed"))?);

    let keystore = Arc::new(match wallet_path {
        Some(path) => {
            let key_path = PathBuf::from(path);
            Keystore::open_with_key_path(&key_path)
                .map_err(|_| anyhow::anyhow!("failed to load wallet key"))?
        }
        None => Keystore::open(&config.node.data_dir)
            .map_err(|_| anyhow::anyhow!("failed to load validator key"))?,
    });
    let self_addr = keystore.address();
    info!(address = %self_addr, "node identity loaded");

    let db_path = Path::new(&config.node.data_dir).join("chain");
    let store = ChainStore::open(db_path.to_str().unwrap_or("./data/chain"))
        .map_err(|_| anyhow::anyhow!("failed to open chain store"))?;

    let sync_remotes = config.consensus.sync_peers.clone();
    if store.is_empty().map_err(|_| anyhow::anyhow!("chain store io error"))? {
        let mut synced = false;
        if !sync_remotes.is_empty() {
            match sync::catch_up(&store, &sync_remotes).await {
                Ok(_) => {
                    info!("adopted chain from a configured remote at startup");
                    synced = true;
                }
                Err(e) => warn!(err = %e, "startup catch-up failed; founding a fresh chain"),
            }
        }
        if !synced {
            store
                .ensure_genesis(now_unix())
                .map_err(|_| anyhow::anyhow!("failed to synthesize genesis"))?;
        }
    }

    let ledger = Arc::new(Mutex::new(
        store
            .replay_into_ledger()
            .map_err(|_| anyhow::anyhow!("failed to replay chain into ledger"))?,
    ));
    let mempool_mirror = Arc::new(Mutex::new(Vec::new()));

    let configured_validators = parse_validators(&config.consensus.validators_hex)?;
    let validators = if configured_validators.is_empty() {
        ValidatorSet::new(vec![self_addr])
    } else {
        ValidatorSet::new(configured_validators)
    };

    let head_height = store
        .head_block()
        .map_err(|_| anyhow::anyhow!("chain store io error"))?
        .map(|b| b.header.height)
        .unwrap_or(0);

    let adapter = ConsensusAdapter::new(validators.clone());
    let mut scheduler = Scheduler::new(validators, self_addr);
    scheduler.on_commit(head_height);

    let (mut timers, mut timer_rx) = TimerSet::new(
        Duration::from_millis(config.consensus.block_interval_ms),
        Duration::from_millis(config.consensus.block_timeout_ms),
        Duration::from_millis(config.consensus.desync_interval_ms),
    );
    timers.arm_silence();
    timers.arm_desync();
    if scheduler.is_proposer() {
        timers.arm_mine();
    }

    let gossip_cfg = GossipConfig {
        listen_addr: config.gossip.listen_addr.clone(),
        peers: config.gossip.peers.clone(),
        known_cap: config.gossip.known_cap,
        per_peer_cap: config.gossip.per_peer_cap,
    };
    let (gossip_handle, mut gossip_rx, _gossip_join) =
        gossip::spawn_gossip(gossip_cfg, metrics.clone())
            .await
            .map_err(|_| anyhow::anyhow!("failed to start gossip overlay"))?;

    let sync_state = SyncState::new(store.clone(), ledger.clone(), mempool_mirror.clone());
    let router = sync::router(sync_state);
    let http_listener = TcpListener::bind(&config.http.listen_addr)
        .await
        .with_context(|| format!("failed to bind http listen address {}", config.http.listen_addr))?;
    info!(addr = %config.http.listen_addr, "sync http surface listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, router).await {
            warn!(err = %e, "sync http server exited");
        }
    });

    let mut node = Node {
        store,
        ledger,
        mempool_mirror,
        adapter,
        scheduler,
        timers,
        gossip: gossip_handle,
        keystore,
        metrics,
        pending_proposals: HashMap::new(),
        sync_remotes,
        self_addr,
    };

    if !config.gossip.peers.is_empty() {
        node.broadcast_envelope(TAG_JOIN, encode_canonical(&self_addr)?).await;
    }

    info!("event loop starting");
    loop {
        tokio::select! {
            maybe_ev = gossip_rx.recv() => {
                match maybe_ev {
                    Some(GossipEvent::Data(bytes)) => node.handle_gossip_data(bytes).await,
                    Some(GossipEvent::Error(e)) => warn!(err = %e, "gossip error"),
                    Some(GossipEvent::Close) | None => {
                        info!("gossip overlay closed, shutting down");
                        break;
                    }
                    Some(_) => {}
                }
            }
            maybe_timer = timer_rx.recv() => {
                match maybe_timer {
                    Some(event) => node.handle_timer_event(event).await,
                    None => break,
                }
            }
            _ = node.timers.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

struct Node {
    store: ChainStore,
    ledger: Arc<Mutex<LedgerState>>,
    mempool_mirror: Arc<Mutex<Vec<Transaction>>>,
    adapter: ConsensusAdapter,
    scheduler: Scheduler,
    timers: TimerSet,
    gossip: GossipHandle,
    keystore: Arc<Keystore<FileSecp256k1Backend>>,
    metrics: Arc<Metrics>,
    pending_proposals: HashMap<H256, Block>,
    sync_remotes: Vec<String>,
    self_addr: Address,
}

impl Node {
    async fn broadcast_envelope(&self, type_tag: u32, body: Vec<u8>) {
        let envelope = WireEnvelope { type_tag, body };
        match encode_canonical(&envelope) {
            Ok(bytes) => self.gossip.broadcast(bytes).await,
            Err(e) => warn!(err = %e, "failed to encode outbound envelope"),
        }
    }

    fn sync_mempool_mirror(&self) {
        *self.mempool_mirror.lock() = self.adapter.drain_mempool_for_proposal(usize::MAX);
    }

    fn already_committed(&self, height: u64) -> bool {
        matches!(self.store.head_block(), Ok(Some(head)) if head.header.height >= height)
    }

    async fn handle_timer_event(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Mine => self.mine().await,
            TimerEvent::Silence => {
                self.scheduler.on_silence_timeout();
                self.metrics.scheduler_silence_rotations_total.inc();
                self.timers.arm_silence();
                if self.scheduler.is_proposer() {
                    self.mine().await;
                } else {
                    self.timers.cancel_mine();
                }
            }
            TimerEvent::Desync => {
                self.run_desync_catchup().await;
                self.timers.arm_desync();
            }
        }
    }

    async fn mine(&mut self) {
        let head = match self.store.head_block() {
            Ok(Some(head)) => head,
            _ => {
                warn!("cannot mine: chain store has no head");
                return;
            }
        };
        let parent_hash = match head.hash() {
            Ok(h) => h,
            Err(_) => return,
        };
        let height = head.header.height + 1;
        let transactions = self.adapter.drain_mempool_for_proposal(MEMPOOL_DRAIN_LIMIT);
        let timestamp = now_unix().max(head.header.timestamp);

        let block = Block {
            header: Header {
                height,
                parent_hash,
                timestamp,
            },
            transactions,
        };
        let proposal = Proposal::Block(block.clone());
        if let Err(e) = self.adapter.verify(&proposal, parent_hash, height) {
            warn!(err = %e, "locally produced proposal failed self-verification");
            return;
        }

        let block_hash = match block.hash() {
            Ok(h) => h,
            Err(_) => return,
        };
        self.pending_proposals.insert(block_hash, block.clone());

        match encode_canonical(&proposal) {
            Ok(bytes) => self.broadcast_envelope(TAG_REQUEST, bytes).await,
            Err(e) => warn!(err = %e, "failed to encode proposal"),
        }

        let round = self.scheduler.round();
        self.cast_vote(height, round, block_hash).await;
    }

    async fn cast_vote(&mut self, height: u64, round: u64, block_hash: H256) {
        let msg = vote_signing_bytes(height, round, block_hash, &self.self_addr);
        let signature = match self.keystore.sign(&msg) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(?e, "failed to sign vote");
                return;
            }
        };
        let vote = Vote {
            height,
            round,
            block_hash,
            voter: self.self_addr,
            signature,
        };

        match self.adapter.handle_vote(vote.clone()) {
            Ok(Some(commit)) => self.apply_commit(commit.clone()).await,
            Ok(None) => {}
            Err(e) => warn!(err = %e, "local vote rejected by engine"),
        }

        match encode_canonical(&ConsensusMsg::Vote(vote)) {
            Ok(bytes) => self.broadcast_envelope(TAG_CONSENSUS_MESSAGE, bytes).await,
            Err(e) => warn!(err = %e, "failed to encode vote"),
        }
    }

    async fn apply_commit(&mut self, commit: crate::core::types::Commit) {
        if self.already_committed(commit.height) {
            return;
        }
        let Some(block) = self.pending_proposals.remove(&commit.block_hash) else {
            warn!(height = commit.height, "commit reached for a proposal this node never saw");
            return;
        };

        let receipts = { self.ledger.lock().process_block(&block) };
        if let Err(e) = self.store.write_block(&block, &receipts) {
            warn!(err = %e, "failed to persist committed block");
            return;
        }

        self.adapter.remove_committed(&block.transactions);
        self.sync_mempool_mirror();
        self.adapter.prune_up_to(block.header.height);
        self.scheduler.on_commit(block.header.height);

        self.timers.cancel_silence();
        self.timers.arm_silence();
        self.timers.cancel_desync();
        self.timers.arm_desync();
        if self.scheduler.is_proposer() {
            self.timers.arm_mine();
        } else {
            self.timers.cancel_mine();
        }

        self.metrics.block_height.set(block.header.height as i64);
        self.metrics
            .transactions_total
            .inc_by(block.transactions.len() as u64);
        self.metrics.blocks_committed_total.inc();
        info!(height = block.header.height, "block committed");

        match encode_canonical(&ConsensusMsg::Commit(commit)) {
            Ok(bytes) => self.broadcast_envelope(TAG_CONSENSUS_MESSAGE, bytes).await,
            Err(e) => warn!(err = %e, "failed to encode commit"),
        }
    }

    async fn run_desync_catchup(&mut self) {
        if self.sync_remotes.is_empty() {
            return;
        }
        self.metrics.sync_catchups_triggered_total.inc();
        match sync::catch_up(&self.store, &self.sync_remotes).await {
            Ok((new_ledger, new_mempool)) => {
                *self.ledger.lock() = new_ledger;
                let head_height = self
                    .store
                    .head_block()
                    .ok()
                    .flatten()
                    .map(|b| b.header.height)
                    .unwrap_or(0);
                self.scheduler.on_commit(head_height);
                self.adapter.prune_up_to(head_height);
                self.pending_proposals.clear();

                let validators = self.adapter.validators().clone();
                self.adapter = ConsensusAdapter::new(validators);
                for tx in new_mempool {
                    self.adapter.submit_transaction(tx);
                }
                self.sync_mempool_mirror();

                if self.scheduler.is_proposer() {
                    self.timers.arm_mine();
                } else {
                    self.timers.cancel_mine();
                }
                self.metrics.sync_catchups_succeeded_total.inc();
                info!(height = head_height, "desync catch-up succeeded");
            }
            Err(e) => warn!(err = %e, "desync catch-up failed, will retry on next timeout"),
        }
    }

    async fn handle_gossip_data(&mut self, bytes: Vec<u8>) {
        let envelope: WireEnvelope = match decode_canonical_limited(&bytes, MAX_ENVELOPE_BYTES) {
            Ok(e) => e,
            Err(e) => {
                warn!(err = %e, "malformed gossip envelope");
                return;
            }
        };

        match envelope.type_tag {
            TAG_CONSENSUS_MESSAGE => self.handle_consensus_message(&envelope.body).await,
            TAG_REQUEST => self.handle_request(&envelope.body).await,
            TAG_JOIN => self.handle_join(&envelope.body).await,
            TAG_VALIDATOR_SET => self.handle_validator_set(&envelope.body).await,
            TAG_REMOVE_VALIDATOR => self.handle_remove_validator(&envelope.body).await,
            other => {
                // backlog/state/custom: no gossip-path consumer in this
                // implementation (state sync goes over the HTTP surface).
                warn!(tag = other, "ignoring envelope with unhandled type tag");
            }
        }
    }

    async fn handle_consensus_message(&mut self, body: &[u8]) {
        let msg: ConsensusMsg = match decode_canonical_limited(body, MAX_ENVELOPE_BYTES) {
            Ok(m) => m,
            Err(e) => {
                warn!(err = %e, "malformed consensus message");
                return;
            }
        };
        match msg {
            ConsensusMsg::Vote(vote) => match self.adapter.handle_vote(vote) {
                Ok(Some(commit)) => self.apply_commit(commit).await,
                Ok(None) => {}
                Err(e) => warn!(err = %e, "rejected inbound vote"),
            },
            ConsensusMsg::Commit(commit) => {
                if self.already_committed(commit.height) {
                    return;
                }
                match self.adapter.verify_commit(&commit) {
                    Ok(()) => self.apply_commit(commit).await,
                    Err(e) => warn!(err = %e, "rejected inbound commit"),
                }
            }
        }
    }

    async fn handle_request(&mut self, body: &[u8]) {
        let proposal = match ConsensusAdapter::decode_proposal(body) {
            Ok(p) => p,
            Err(_) => {
                warn!("rejected proposal: unknown or malformed");
                return;
            }
        };
        let Proposal::Block(block) = &proposal;

        let head = match self.store.head_block() {
            Ok(Some(head)) => head,
            _ => return,
        };
        let expected_parent = match head.hash() {
            Ok(h) => h,
            Err(_) => return,
        };
        let expected_height = head.header.height + 1;
        if block.header.height < expected_height {
            // Stale proposal for an already-committed height; ignore.
            return;
        }

        if let Err(e) = self.adapter.verify(&proposal, expected_parent, expected_height) {
            warn!(err = %e, "rejected proposal");
            return;
        }

        let block_hash = match block.hash() {
            Ok(h) => h,
            Err(_) => return,
        };
        if self.pending_proposals.contains_key(&block_hash) {
            // Already processed — e.g. the node's own proposal, self-echoed
            // back through the gossip overlay's local-receive contract.
            return;
        }
        self.pending_proposals.insert(block_hash, block.clone());
        let round = self.scheduler.round();
        self.cast_vote(block.header.height, round, block_hash).await;
    }

    async fn handle_join(&mut self, body: &[u8]) {
        let addr: Address = match decode_canonical_limited(body, 64) {
            Ok(a) => a,
            Err(e) => {
                warn!(err = %e, "malformed join announcement");
                return;
            }
        };

        if self.scheduler.is_proposer() {
            let gift = ValidatorSetGift {
                set: self.adapter.validators().clone(),
                dest: addr,
            };
            if let Ok(bytes) = encode_canonical(&gift) {
                self.broadcast_envelope(TAG_VALIDATOR_SET, bytes).await;
            }
        }

        self.adapter.handle_event(AdapterEvent::AddValidator(addr));
        self.scheduler.set_validators(self.adapter.validators().clone());
        info!(peer = %addr, "validator joined");
    }

    async fn handle_validator_set(&mut self, body: &[u8]) {
        let gift: ValidatorSetGift = match decode_canonical_limited(body, MAX_ENVELOPE_BYTES) {
            Ok(g) => g,
            Err(e) => {
                warn!(err = %e, "malformed validator-set gift");
                return;
            }
        };
        if gift.dest != self.self_addr {
            return;
        }

        let mut set = gift.set;
        set.add(self.self_addr);
        self.adapter.handle_event(AdapterEvent::ValidatorSet(set.clone()));

        let head_height = self
            .store
            .head_block()
            .ok()
            .flatten()
            .map(|b| b.header.height)
            .unwrap_or(0);
        self.scheduler = Scheduler::new(set, self.self_addr);
        self.scheduler.on_commit(head_height);
        self.timers.arm_silence();
        if self.scheduler.is_proposer() {
            self.timers.arm_mine();
        }
        info!("adopted validator set gift, now participating in consensus");
    }

    async fn handle_remove_validator(&mut self, body: &[u8]) {
        let addr: Address = match decode_canonical_limited(body, 64) {
            Ok(a) => a,
            Err(e) => {
                warn!(err = %e, "malformed remove-validator message");
                return;
            }
        };
        self.adapter.handle_event(AdapterEvent::RemoveValidator(addr));
        self.scheduler.set_validators(self.adapter.validators().clone());
    }
}
