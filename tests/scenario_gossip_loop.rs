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

// Scenario S7: three nodes A—B—C wired in a line. A broadcasts a payload;
// each of B and C must observe exactly one Data event, and no further
// rebroadcast loops back around.

use poa_ledger::monitoring::metrics::Metrics;
use poa_ledger::networking::gossip::{spawn_gossip, GossipConfig, GossipEvent};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_node(
    peers: Vec<String>,
) -> (
    poa_ledger::networking::gossip::GossipHandle,
    tokio::sync::mpsc::Receiver<GossipEvent>,
) {
    let metrics = Arc::new(Metrics::new().unwrap());
    let (handle, rx, _join) = spawn_gossip(
        GossipConfig {
            listen_addr: "127.0.0.1:0".into(),
            peers,
            known_cap: 64,
            per_peer_cap: 64,
        },
        metrics,
    )
    .await
    .unwrap();
    (handle, rx)
}

async fn wait_for_listen_addr(rx: &mut tokio::sync::mpsc::Receiver<GossipEvent>) -> std::net::SocketAddr {
    loop {
        match rx.recv().await.expect("gossip event stream closed before Listen") {
            GossipEvent::Listen(addr) => return addr,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn line_topology_delivers_broadcast_exactly_once_to_each_downstream_node() {
    // Spawn C first (no peers), then B dialing C, then A dialing B: A—B—C.
    let (_handle_c, mut rx_c) = spawn_node(vec![]).await;
    let addr_c = wait_for_listen_addr(&mut rx_c).await;

    let (_handle_b, mut rx_b) = spawn_node(vec![addr_c.to_string()]).await;
    let addr_b = wait_for_listen_addr(&mut rx_b).await;

    let (handle_a, mut rx_a) = spawn_node(vec![addr_b.to_string()]).await;
    let _addr_a = wait_for_listen_addr(&mut rx_a).await;

    // Give the dial-and-accept handshakes a moment to complete.
    tokio::time::sleep(Duration::from_millis(150)).await;

    handle_a.broadcast(b"line-topology-payload".to_vec()).await;

    let mut a_data_events = 0;
    let mut b_data_events = 0;
    let mut c_data_events = 0;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline
        && (a_data_events == 0 || b_data_events == 0 || c_data_events == 0)
    {
        tokio::select! {
            Some(ev) = rx_a.recv() => {
                if let GossipEvent::Data(payload) = ev {
                    assert_eq!(payload, b"line-topology-payload");
                    a_data_events += 1;
                }
            }
            Some(ev) = rx_b.recv() => {
                if let GossipEvent::Data(payload) = ev {
                    assert_eq!(payload, b"line-topology-payload");
                    b_data_events += 1;
                }
            }
            Some(ev) = rx_c.recv() => {
                if let GossipEvent::Data(payload) = ev {
                    assert_eq!(payload, b"line-topology-payload");
                    c_data_events += 1;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }

    assert_eq!(a_data_events, 1, "the broadcaster must see its own payload exactly once");
    assert_eq!(b_data_events, 1, "B must see the payload exactly once");
    assert_eq!(c_data_events, 1, "C must see the payload exactly once");

    // Drain briefly to confirm no further rebroadcast loops the payload
    // back around the line a second time.
    let no_more_deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    let mut extra = 0;
    while tokio::time::Instant::now() < no_more_deadline {
        tokio::select! {
            Some(GossipEvent::Data(_)) = rx_a.recv() => extra += 1,
            Some(GossipEvent::Data(_)) = rx_b.recv() => extra += 1,
            Some(GossipEvent::Data(_)) = rx_c.recv() => extra += 1,
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
    assert_eq!(extra, 0, "no further rebroadcast should occur once all peers have seen the payload");
}
