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

//! Node entrypoint (systemd-friendly). Parses configuration, wires up
//! tracing, and runs the event loop forever.

use poa_ledger::core::types::{
    ConsensusConfig, GossipConfig, HttpConfig, NodeConfig, NodeSettings,
};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

struct Cli {
    config_path: Option<String>,
    data_dir: Option<String>,
    wallet_path: Option<String>,
    sync_peers: Vec<String>,
    gossip_peers: Vec<String>,
    no_discovery: bool,
}

fn parse_cli() -> Cli {
    let mut cli = Cli {
        config_path: None,
        data_dir: None,
        wallet_path: None,
        sync_peers: Vec::new(),
        gossip_peers: Vec::new(),
        no_discovery: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => cli.config_path = args.next(),
            "-d" | "--data-dir" => cli.data_dir = args.next(),
            "-w" | "--wallet" => cli.wallet_path = args.next(),
            "-s" | "--sync-peer" => {
                if let Some(v) = args.next() {
                    cli.sync_peers.push(v);
                }
            }
            "-v" | "--validator-peer" => {
                if let Some(v) = args.next() {
                    cli.gossip_peers.push(v);
                }
            }
            "--no-discovery" => cli.no_discovery = true,
            _ => {}
        }
    }
    cli
}

/// Default configuration used when no `-c`/`--config` TOML file is given.
fn default_config(cli: &Cli) -> NodeConfig {
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| env("POA_DATA_DIR", "./data"));
    let validator_port = env_u16("VAL_PORT", 30303);
    let endpoint_port = env_u16("EP_PORT", 9090);

    NodeConfig {
        node: NodeSettings {
            name: "poa-ledger-node".to_string(),
            data_dir,
        },
        http: HttpConfig {
            listen_addr: format!("0.0.0.0:{endpoint_port}"),
        },
        gossip: GossipConfig {
            listen_addr: format!("0.0.0.0:{validator_port}"),
            // DNS-seed resolution is out of scope here (see spec §1); this
            // node only ever dials the `-v`-configured peers, so
            // `--no-discovery` has nothing to disable but is still accepted.
            peers: cli.gossip_peers.clone(),
            known_cap: 4096,
            per_peer_cap: 4096,
        },
        consensus: ConsensusConfig {
            validators_hex: Vec::new(),
            block_interval_ms: 10_000,
            block_timeout_ms: 20_000,
            desync_interval_ms: 60_000,
            sync_peers: cli.sync_peers.clone(),
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    match &cli.config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&raw)?)
        }
        None => Ok(default_config(cli)),
    }
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt().with_target(false).with_level(true);
    if cfg!(feature = "production") {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.compact().try_init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = parse_cli();
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if cli.no_discovery {
        tracing::info!("--no-discovery set (DNS-seed resolution is out of scope; no-op)");
    }
    tracing::info!(data_dir = %config.node.data_dir, "poa-ledger node starting");

    if let Err(e) = poa_ledger::node::run(config, cli.wallet_path).await {
        eprintln!("node exited with error: {e}");
        std::process::exit(1);
    }
}
