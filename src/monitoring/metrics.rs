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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric could not be constructed or registered with the registry.
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Connected gossip peers gauge.
    pub p2p_peers: IntGauge,
    /// Current chain head height.
    pub block_height: IntGauge,
    /// Total transactions committed into blocks.
    pub transactions_total: IntCounter,

    /// Gossip payloads dropped because they were already in the dedup cache.
    pub gossip_dedup_dropped_total: IntCounter,
    /// Observational gossip events dropped because the event channel was full.
    pub gossip_events_dropped_total: IntCounter,
    /// Blocks committed by the BFT engine.
    pub blocks_committed_total: IntCounter,
    /// Signer-cursor advances caused by a proposer silence timeout.
    pub scheduler_silence_rotations_total: IntCounter,
    /// Desync timers that fired and triggered a sync-service catch-up.
    pub sync_catchups_triggered_total: IntCounter,
    /// Sync-service catch-up attempts that succeeded against a remote.
    pub sync_catchups_succeeded_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let p2p_peers = IntGauge::new("poa_ledger_gossip_peers", "Connected gossip peers")
            .map_err(|_| MetricsError::Prom)?;
        let block_height = IntGauge::new("poa_ledger_block_height", "Current chain head height")
            .map_err(|_| MetricsError::Prom)?;
        let transactions_total = IntCounter::new(
            "poa_ledger_transactions_total",
            "Total transactions committed into blocks",
        )
        .map_err(|_| MetricsError::Prom)?;

        let gossip_dedup_dropped_total = IntCounter::new(
            "poa_ledger_gossip_dedup_dropped_total",
            "Gossip payloads dropped as already-seen duplicates",
        )
        .map_err(|_| MetricsError::Prom)?;
        let gossip_events_dropped_total = IntCounter::new(
            "poa_ledger_gossip_events_dropped_total",
            "Observational gossip events dropped on a full event channel",
        )
        .map_err(|_| MetricsError::Prom)?;
        let blocks_committed_total = IntCounter::new(
            "poa_ledger_blocks_committed_total",
            "Blocks committed by the BFT engine",
        )
        .map_err(|_| MetricsError::Prom)?;
        let scheduler_silence_rotations_total = IntCounter::new(
            "poa_ledger_scheduler_silence_rotations_total",
            "Signer-cursor advances caused by a proposer silence timeout",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sync_catchups_triggered_total = IntCounter::new(
            "poa_ledger_sync_catchups_triggered_total",
            "Desync timers that fired and triggered a sync-service catch-up",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sync_catchups_succeeded_total = IntCounter::new(
            "poa_ledger_sync_catchups_succeeded_total",
            "Sync-service catch-up attempts that succeeded against a remote",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(p2p_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(block_height.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(transactions_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(gossip_dedup_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(gossip_events_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(blocks_committed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(scheduler_silence_rotations_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sync_catchups_triggered_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sync_catchups_succeeded_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            p2p_peers,
            block_height,
            transactions_total,
            gossip_dedup_dropped_total,
            gossip_events_dropped_total,
            blocks_committed_total,
            scheduler_silence_rotations_total,
            sync_catchups_triggered_total,
            sync_catchups_succeeded_total,
        })
    }
}
