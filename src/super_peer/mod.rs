//! Super-peer: indexing server, flood participant, and consistency engine
//!
//! A super-peer accepts two kinds of connections on one listen port. Leaf
//! sessions (role byte `'1'`) are long-lived: the leaf identifies itself once
//! and then streams registration actions, searches, and inspector requests
//! until it disconnects. Peer dialogs (role byte `'0'`) are one-shot
//! transactions carrying a flooded query, invalidate, or compare message from
//! a neighbor super-peer.

pub mod consistency;
pub mod flood;
pub mod index;
pub mod message_ids;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::{ConsistencyMethod, OverlayConfig};
use crate::error::{MeshError, MeshResult};
use crate::wire::{
    read_filename, read_i32, read_i64, read_tag, write_id_list, FloodHeader, PeerRequest,
    RegistrationAction, SessionRequest, ROLE_LEAF, ROLE_PEER,
};

use consistency::{PendingModification, PendingQueue};
use index::FileIndex;
use message_ids::MessageIdStore;

/// Kernel-side accept backlog; overflow connections are refused.
const LISTEN_BACKLOG: u32 = 5;

/// One super-peer process: the file index for its attached leaves plus its
/// position in the static peer graph.
pub struct SuperPeer {
    /// Listen port; also this super-peer's identity in log output.
    pub port: i32,

    /// Neighbor super-peer ports, shuffled once at startup. Every flood
    /// visits all of them, so the shuffle only spreads load.
    peers: Vec<i32>,

    /// Ports of the leaves attached to this super-peer.
    leaves: Vec<i32>,

    method: ConsistencyMethod,
    ttr: Duration,
    ttl: i32,

    index: FileIndex,
    message_ids: MessageIdStore,
    pending: PendingQueue,

    /// Sequence numbers for flood messages this super-peer originates.
    sequence: AtomicI32,
}

impl SuperPeer {
    /// Build from the member record registered under CLI id `id`.
    pub fn new(id: i32, config: &OverlayConfig) -> MeshResult<Self> {
        let record = config.super_peer(id)?;
        let mut peers = record.peers.clone();
        peers.shuffle(&mut rand::rng());

        Ok(Self {
            port: record.port,
            peers,
            leaves: record.leaves.clone(),
            method: config.consistency,
            ttr: Duration::from_secs(config.ttr),
            ttl: config.ttl,
            index: FileIndex::new(),
            message_ids: MessageIdStore::new(),
            pending: PendingQueue::new(),
            sequence: AtomicI32::new(0),
        })
    }

    /// Bind the listen socket with the protocol's fixed backlog.
    pub async fn bind(&self) -> MeshResult<TcpListener> {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.port as u16));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(LISTEN_BACKLOG)?)
    }

    /// Run forever: the accept loop plus the background maintenance tasks.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        Arc::clone(&self).spawn_message_id_sweeper();
        if self.method == ConsistencyMethod::PullPeer {
            Arc::clone(&self).spawn_pending_drain();
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::info!(%addr, "connection established");
                    let me = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = me.handle_connection(stream).await {
                            tracing::warn!(error = %e, "dialog dropped");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "failed connection; ignoring"),
            }
        }
    }

    fn spawn_message_id_sweeper(self: Arc<Self>) {
        let me = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(message_ids::RETENTION);
            tick.tick().await;
            loop {
                tick.tick().await;
                me.message_ids.sweep();
                tracing::debug!(retained = me.message_ids.len(), "swept message ids");
            }
        });
    }

    fn spawn_pending_drain(self: Arc<Self>) {
        let me = self;
        // A zero TTR would make the interval spin; clamp to one second.
        let period = me.ttr.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                me.drain_pending().await;
            }
        });
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> MeshResult<()> {
        let role = read_tag(&mut stream).await?;
        match role {
            ROLE_PEER => self.handle_peer_dialog(stream).await,
            ROLE_LEAF => self.handle_leaf_session(stream).await,
            byte => {
                tracing::warn!(byte, "unidentified connection; closing");
                Err(MeshError::UnexpectedRequest { byte })
            }
        }
    }

    // ---- peer dialogs (one-shot) -------------------------------------------

    async fn handle_peer_dialog(&self, mut stream: TcpStream) -> MeshResult<()> {
        let tag = read_tag(&mut stream).await?;
        let Some(request) = PeerRequest::from_tag(tag) else {
            tracing::warn!(byte = tag, "unexpected peer request; closing");
            return Err(MeshError::UnexpectedRequest { byte: tag });
        };
        match request {
            PeerRequest::Query => self.handle_query(&mut stream).await,
            PeerRequest::Invalidate => self.handle_invalidate(&mut stream).await,
            PeerRequest::Compare => self.handle_compare(&mut stream).await,
        }
    }

    /// Flooded query: duplicate-suppressed local lookup plus TTL-bounded
    /// forwarding. Replies with the union of local and downstream hits; a
    /// duplicate gets an empty reply and is not forwarded.
    async fn handle_query(&self, stream: &mut TcpStream) -> MeshResult<()> {
        let header = FloodHeader::read_from(stream).await?;
        let mut hits = Vec::new();

        if self.message_ids.first_sighting(header.message_id()) {
            hits = self.index.lookup(&header.filename).await;
            if header.ttl > 0 {
                let forwarded = FloodHeader {
                    ttl: header.ttl - 1,
                    ..header.clone()
                };
                hits.extend(
                    flood::query_neighbors(&self.peers, &forwarded, &self.message_ids).await,
                );
            }
        } else {
            tracing::debug!(
                origin = header.origin,
                seq = header.seq,
                "message already seen; empty reply"
            );
        }

        write_id_list(stream, &hits).await
    }

    /// Flooded invalidate (push consistency): invalidate our own attached
    /// leaves, then keep the flood moving while TTL remains.
    async fn handle_invalidate(&self, stream: &mut TcpStream) -> MeshResult<()> {
        let header = FloodHeader::read_from(stream).await?;
        let version = read_i64(stream).await?;

        if self.message_ids.first_sighting(header.message_id()) {
            self.invalidate_attached(header.origin, &header.filename, version)
                .await;
            if header.ttl > 0 {
                let forwarded = FloodHeader {
                    ttl: header.ttl - 1,
                    ..header.clone()
                };
                flood::broadcast(
                    PeerRequest::Invalidate,
                    &self.peers,
                    &forwarded,
                    version,
                    &self.message_ids,
                )
                .await;
            }
        }
        Ok(())
    }

    /// Flooded compare (pull-from-peers): like an invalidate, but the local
    /// step only runs when the filename is indexed here.
    async fn handle_compare(&self, stream: &mut TcpStream) -> MeshResult<()> {
        let header = FloodHeader::read_from(stream).await?;
        let version = read_i64(stream).await?;

        if self.message_ids.first_sighting(header.message_id()) {
            if self.index.contains(&header.filename).await {
                self.invalidate_attached(header.origin, &header.filename, version)
                    .await;
            }
            if header.ttl > 0 {
                let forwarded = FloodHeader {
                    ttl: header.ttl - 1,
                    ..header.clone()
                };
                flood::broadcast(
                    PeerRequest::Compare,
                    &self.peers,
                    &forwarded,
                    version,
                    &self.message_ids,
                )
                .await;
            }
        }
        Ok(())
    }

    /// Open short-lived invalidate links to every attached leaf, other than
    /// the origin, that currently indexes `filename`. The index lock is
    /// released before the first connection is dialed.
    async fn invalidate_attached(&self, origin: i32, filename: &str, version: i64) {
        let indexed = self.index.lookup(filename).await;
        for &leaf in &self.leaves {
            if leaf == origin || !indexed.contains(&leaf) {
                continue;
            }
            match consistency::invalidate_leaf(leaf, origin, filename, version).await {
                Ok(()) => tracing::info!(leaf, filename, version, "invalidated cached copy"),
                Err(e) => tracing::warn!(leaf, error = %e, "leaf invalidate failed; ignoring"),
            }
        }
    }

    // ---- leaf sessions (long-lived) ----------------------------------------

    async fn handle_leaf_session(&self, mut stream: TcpStream) -> MeshResult<()> {
        let leaf = read_i32(&mut stream).await?;
        tracing::info!(leaf, "leaf session opened");

        loop {
            let tag = match read_tag(&mut stream).await {
                Ok(tag) => tag,
                Err(_) => {
                    self.close_leaf_session(leaf, "leaf unresponsive").await;
                    return Ok(());
                }
            };
            let Some(request) = SessionRequest::from_tag(tag) else {
                self.close_leaf_session(leaf, "unexpected request").await;
                return Err(MeshError::UnexpectedRequest { byte: tag });
            };

            match request {
                SessionRequest::Register | SessionRequest::Deregister => {
                    let action =
                        match RegistrationAction::read_remaining(&mut stream, request).await {
                            Ok(action) => action,
                            Err(e) => {
                                self.close_leaf_session(leaf, "leaf unresponsive").await;
                                return Err(e);
                            }
                        };
                    self.apply_registration(leaf, action).await;
                }
                SessionRequest::Search => {
                    let filename = match read_filename(&mut stream).await {
                        Ok(name) => name,
                        Err(e) => {
                            self.close_leaf_session(leaf, "leaf unresponsive").await;
                            return Err(e);
                        }
                    };
                    let hits = self.node_search(leaf, &filename).await;
                    if let Err(e) = write_id_list(&mut stream, &hits).await {
                        self.close_leaf_session(leaf, "leaf unresponsive").await;
                        return Err(e);
                    }
                }
                SessionRequest::DumpIndex => self.dump_index().await,
                SessionRequest::DumpMessageIds => self.dump_message_ids(),
                SessionRequest::DumpPending => self.dump_pending().await,
                SessionRequest::Disconnect => {
                    self.close_leaf_session(leaf, "leaf disconnected").await;
                    return Ok(());
                }
            }
        }
    }

    /// A leaf disconnect, clean or not, implicitly deregisters everything it
    /// advertised.
    async fn close_leaf_session(&self, leaf: i32, why: &str) {
        tracing::info!(leaf, why, "closing session and scrubbing index");
        self.index.cleanup(leaf).await;
    }

    /// Apply one action from the registration stream.
    async fn apply_registration(&self, leaf: i32, action: RegistrationAction) {
        match action {
            RegistrationAction::Register { filename } => {
                self.index.register(leaf, &filename).await;
            }
            RegistrationAction::DropCache { filename } => {
                self.index.deregister(leaf, &filename).await;
            }
            RegistrationAction::ModifyOrigin { filename, version } => {
                self.index.deregister(leaf, &filename).await;
                self.origin_modified(leaf, &filename, version).await;
            }
        }
    }

    /// Consistency dispatch for an origin-reported modification.
    async fn origin_modified(&self, origin: i32, filename: &str, version: i64) {
        tracing::info!(origin, filename, version, "origin modified file");
        match self.method {
            ConsistencyMethod::Push => {
                self.invalidate_attached(origin, filename, version).await;
                let header = FloodHeader {
                    ttl: self.ttl,
                    origin,
                    seq: self.next_sequence(),
                    filename: filename.to_owned(),
                };
                flood::broadcast(
                    PeerRequest::Invalidate,
                    &self.peers,
                    &header,
                    version,
                    &self.message_ids,
                )
                .await;
            }
            // Leaves poll their origins directly; the super-peer stays passive.
            ConsistencyMethod::PullNode => {}
            ConsistencyMethod::PullPeer => {
                self.pending
                    .push(PendingModification {
                        filename: filename.to_owned(),
                        origin,
                        version,
                    })
                    .await;
            }
        }
    }

    /// Search on behalf of an attached leaf: fresh sequence number, local
    /// lookup, then a query flood, returning the concatenated hits.
    async fn node_search(&self, leaf: i32, filename: &str) -> Vec<i32> {
        let seq = self.next_sequence();
        tracing::info!(leaf, filename, seq, "search request");

        let mut hits = self.index.lookup(filename).await;
        let header = FloodHeader {
            ttl: self.ttl,
            origin: leaf,
            seq,
            filename: filename.to_owned(),
        };
        hits.extend(flood::query_neighbors(&self.peers, &header, &self.message_ids).await);
        hits
    }

    fn next_sequence(&self) -> i32 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Pull-from-peers drain tick: snapshot the queue under its lock, then
    /// invalidate our own leaves and broadcast compares with no locks held.
    async fn drain_pending(&self) {
        for modification in self.pending.drain().await {
            if self.index.contains(&modification.filename).await {
                self.invalidate_attached(
                    modification.origin,
                    &modification.filename,
                    modification.version,
                )
                .await;
            }
            let header = FloodHeader {
                ttl: self.ttl,
                origin: modification.origin,
                seq: self.next_sequence(),
                filename: modification.filename.clone(),
            };
            flood::broadcast(
                PeerRequest::Compare,
                &self.peers,
                &header,
                modification.version,
                &self.message_ids,
            )
            .await;
        }
    }

    // ---- inspector dumps ---------------------------------------------------

    async fn dump_index(&self) {
        let snapshot = self.index.snapshot().await;
        match serde_json::to_string(&snapshot) {
            Ok(json) => tracing::info!(target: "inspect", index = %json, "file index"),
            Err(e) => tracing::warn!(error = %e, "file index dump failed"),
        }
    }

    fn dump_message_ids(&self) {
        match serde_json::to_string(&self.message_ids.snapshot()) {
            Ok(json) => tracing::info!(target: "inspect", message_ids = %json, "message ids"),
            Err(e) => tracing::warn!(error = %e, "message id dump failed"),
        }
    }

    async fn dump_pending(&self) {
        match serde_json::to_string(&self.pending.snapshot().await) {
            Ok(json) => tracing::info!(target: "inspect", pending = %json, "pending modifications"),
            Err(e) => tracing::warn!(error = %e, "pending modification dump failed"),
        }
    }
}
