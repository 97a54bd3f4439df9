//! The registration stream end to end: a real leaf advertising a real
//! directory to a real super-peer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use filemesh::leaf::link::SuperPeerLink;
use filemesh::leaf::store::DiskStore;
use filemesh::LeafNode;
use filemesh::ConsistencyMethod;
use tokio::sync::Mutex;

#[tokio::test]
async fn scanned_files_are_advertised_on_the_first_tick() {
    let ports = free_ports(3);
    let (s, l1, l2) = (ports[0], ports[1], ports[2]);
    let config = overlay(
        ConsistencyMethod::Push,
        0,
        1,
        vec![sp(1, s, vec![], vec![l1, l2])],
        vec![lf(1, l1, s), lf(2, l2, s)],
    );
    start_super_peer(1, &config).await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("local")).unwrap();
    std::fs::create_dir(dir.path().join("remote")).unwrap();
    std::fs::write(dir.path().join("local/a.txt"), b"alpha").unwrap();
    std::fs::write(dir.path().join("local/b.txt"), b"beta").unwrap();

    let store = DiskStore::new(dir.path()).unwrap();
    let node = Arc::new(LeafNode::new(1, &config, Arc::new(store)).unwrap());
    node.rescan_local().await.unwrap();

    let link = SuperPeerLink::connect(node.super_peer_port, node.port)
        .await
        .unwrap();
    tokio::spawn(Arc::clone(&node).registration_loop(Arc::new(Mutex::new(link))));

    // The first tick fires immediately; give it a moment to be applied.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut probe = SuperPeerLink::connect(s, l2).await.unwrap();
    assert_eq!(probe.search("a.txt").await.unwrap(), vec![l1]);
    assert_eq!(probe.search("b.txt").await.unwrap(), vec![l1]);
    assert!(probe.search("c.txt").await.unwrap().is_empty());
}
