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

//! A replicated, append-only ledger driven by a proof-of-authority BFT-lite
//! consensus.
//!
//! This crate provides:
//! - Deterministic types and canonical (bincode + Keccak-256) encoding
//! - A BFT-lite finality engine (vote accumulation, double-vote detection,
//!   2/3+1 commit construction) bridged to the rest of the node by
//!   [`core::consensus::adapter::ConsensusAdapter`]
//! - A round-robin authority scheduler and its cancellable mine/silence/desync
//!   timers
//! - A loop-free gossip overlay over raw TCP with bounded anti-entropy caches
//! - An embedded, transactional `sled` chain store and in-memory balance ledger
//! - An `axum` HTTP surface for chain/mempool sync and balance queries
//! - A secp256k1 keystore with optional at-rest encryption and an audit trail
//! - Monitoring via Prometheus metrics and structured logging

/// Core protocol primitives (types, consensus, scheduler, state, security).
pub mod core;
/// Observability (Prometheus metrics).
pub mod monitoring;
/// Networking stack (gossip overlay, HTTP sync surface).
pub mod networking;
/// The single-task event loop tying every subsystem together.
pub mod node;
