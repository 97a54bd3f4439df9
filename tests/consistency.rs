//! Consistency schemes observed from a leaf's point of view: stand-in
//! listeners record the invalidate dialogs a super-peer opens toward its
//! attached leaves.

mod common;

use std::time::Duration;

use common::*;
use filemesh::leaf::link::SuperPeerLink;
use filemesh::wire::RegistrationAction;
use filemesh::ConsistencyMethod;
use tokio::time::timeout;

async fn link(super_port: i32, my_port: i32) -> SuperPeerLink {
    SuperPeerLink::connect(super_port, my_port).await.unwrap()
}

fn register(filename: &str) -> RegistrationAction {
    RegistrationAction::Register {
        filename: filename.into(),
    }
}

fn modify(filename: &str, version: i64) -> RegistrationAction {
    RegistrationAction::ModifyOrigin {
        filename: filename.into(),
        version,
    }
}

#[tokio::test]
async fn push_invalidates_attached_leaves_that_index_the_file() {
    let ports = free_ports(3);
    let (s, l1, l2) = (ports[0], ports[1], ports[2]);
    let config = overlay(
        ConsistencyMethod::Push,
        0,
        1,
        vec![sp(1, s, vec![], vec![l1, l2])],
        vec![],
    );
    start_super_peer(1, &config).await;
    let mut invalidations = spawn_invalidate_recorder(l2).await;

    // L2 caches f and advertises it.
    let mut cache = link(s, l2).await;
    cache.send(&register("f")).await.unwrap();
    assert_eq!(cache.search("f").await.unwrap(), vec![l2]);

    // The origin reports a modification of f.
    let mut origin = link(s, l1).await;
    origin.send(&register("f")).await.unwrap();
    origin.send(&modify("f", 200)).await.unwrap();
    origin.search("f").await.unwrap();

    let got = timeout(Duration::from_secs(2), invalidations.recv())
        .await
        .expect("push invalidation never arrived")
        .unwrap();
    assert_eq!(got, (l1, "f".to_string(), 200));
}

#[tokio::test]
async fn push_invalidation_floods_across_the_peer_graph() {
    let ports = free_ports(4);
    let (s1, s2, l1, l2) = (ports[0], ports[1], ports[2], ports[3]);
    let config = overlay(
        ConsistencyMethod::Push,
        0,
        1,
        vec![
            sp(1, s1, vec![s2], vec![l1]),
            sp(2, s2, vec![s1], vec![l2]),
        ],
        vec![],
    );
    start_super_peer(1, &config).await;
    start_super_peer(2, &config).await;
    let mut invalidations = spawn_invalidate_recorder(l2).await;

    let mut cache = link(s2, l2).await;
    cache.send(&register("f")).await.unwrap();
    assert_eq!(cache.search("f").await.unwrap(), vec![l2]);

    let mut origin = link(s1, l1).await;
    origin.send(&register("f")).await.unwrap();
    origin.send(&modify("f", 200)).await.unwrap();
    origin.search("f").await.unwrap();

    let got = timeout(Duration::from_secs(2), invalidations.recv())
        .await
        .expect("flooded invalidation never arrived")
        .unwrap();
    assert_eq!(got, (l1, "f".to_string(), 200));
}

#[tokio::test]
async fn pull_peer_queues_and_drains_on_the_ttr_timer() {
    let ports = free_ports(3);
    let (s, l1, l2) = (ports[0], ports[1], ports[2]);
    let config = overlay(
        ConsistencyMethod::PullPeer,
        1,
        1,
        vec![sp(1, s, vec![], vec![l1, l2])],
        vec![],
    );
    start_super_peer(1, &config).await;
    let mut invalidations = spawn_invalidate_recorder(l2).await;

    let mut cache = link(s, l2).await;
    cache.send(&register("f")).await.unwrap();
    assert_eq!(cache.search("f").await.unwrap(), vec![l2]);

    let mut origin = link(s, l1).await;
    origin.send(&modify("f", 300)).await.unwrap();
    origin.search("f").await.unwrap();

    // Nothing is pushed immediately; the queue drains on the next TTR tick.
    let got = timeout(Duration::from_secs(5), invalidations.recv())
        .await
        .expect("compare drain never invalidated the leaf")
        .unwrap();
    assert_eq!(got, (l1, "f".to_string(), 300));
}

#[tokio::test]
async fn pull_node_leaves_the_super_peer_passive() {
    let ports = free_ports(3);
    let (s, l1, l2) = (ports[0], ports[1], ports[2]);
    let config = overlay(
        ConsistencyMethod::PullNode,
        1,
        1,
        vec![sp(1, s, vec![], vec![l1, l2])],
        vec![],
    );
    start_super_peer(1, &config).await;
    let mut invalidations = spawn_invalidate_recorder(l2).await;

    let mut cache = link(s, l2).await;
    cache.send(&register("f")).await.unwrap();
    assert_eq!(cache.search("f").await.unwrap(), vec![l2]);

    let mut origin = link(s, l1).await;
    origin.send(&modify("f", 300)).await.unwrap();
    origin.search("f").await.unwrap();

    // Under pull-from-origin the super-peer never contacts leaves.
    assert!(
        timeout(Duration::from_secs(2), invalidations.recv())
            .await
            .is_err(),
        "pull-node super-peer pushed an invalidation"
    );
}
