//! Shared helpers for the overlay integration tests

#![allow(dead_code)]

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;

use tokio::sync::mpsc;

use filemesh::config::{LeafRecord, OverlayConfig, SuperPeerRecord};
use filemesh::wire::{read_filename, read_i32, read_i64, read_tag, ROLE_PEER};
use filemesh::{ConsistencyMethod, SuperPeer};

/// Reserve `n` distinct loopback ports by holding them open simultaneously.
pub fn free_ports(n: usize) -> Vec<i32> {
    let listeners: Vec<StdTcpListener> = (0..n)
        .map(|_| StdTcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port() as i32)
        .collect()
}

pub fn sp(id: i32, port: i32, peers: Vec<i32>, leaves: Vec<i32>) -> SuperPeerRecord {
    SuperPeerRecord {
        id,
        port,
        peers,
        leaves,
    }
}

pub fn lf(id: i32, port: i32, super_peer_port: i32) -> LeafRecord {
    LeafRecord {
        id,
        port,
        super_peer_port,
    }
}

pub fn overlay(
    consistency: ConsistencyMethod,
    ttr: u64,
    ttl: i32,
    super_peers: Vec<SuperPeerRecord>,
    leaves: Vec<LeafRecord>,
) -> OverlayConfig {
    OverlayConfig {
        consistency,
        ttr,
        ttl,
        super_peers,
        leaves,
    }
}

/// Bind and run a super-peer in the background.
pub async fn start_super_peer(id: i32, config: &OverlayConfig) -> Arc<SuperPeer> {
    let peer = Arc::new(SuperPeer::new(id, config).unwrap());
    let listener = peer.bind().await.unwrap();
    tokio::spawn(Arc::clone(&peer).run(listener));
    peer
}

/// A pushed invalidation observed by a stand-in leaf listener.
pub type Invalidation = (i32, String, i64);

/// Listener standing in for a leaf's inbound server; records every
/// invalidate dialog it receives.
pub async fn spawn_invalidate_recorder(port: i32) -> mpsc::UnboundedReceiver<Invalidation> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port as u16))
        .await
        .unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(role) = read_tag(&mut stream).await else {
                    return;
                };
                if role != ROLE_PEER {
                    return;
                }
                let (Ok(origin), Ok(filename), Ok(version)) = (
                    read_i32(&mut stream).await,
                    read_filename(&mut stream).await,
                    read_i64(&mut stream).await,
                ) else {
                    return;
                };
                let _ = tx.send((origin, filename, version));
            });
        }
    });
    rx
}
