//! Leaf node: local catalog owner, cache, and obtain client/server
//!
//! A leaf serves inbound obtain/poll/invalidate dialogs on its listen port
//! while a background task streams registration deltas to its super-peer
//! every five seconds. The interactive driver (the terminal in the binary)
//! shares the super-peer link with that task through a mutex, which is what
//! keeps per-link ordering and avoids short-lived sessions that would
//! trigger an index cleanup.

pub mod catalog;
pub mod link;
pub mod obtain;
pub mod poll;
pub mod server;
pub mod store;

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Mutex;

use crate::config::{ConsistencyMethod, OverlayConfig};
use crate::error::MeshResult;
use crate::wire::RegistrationAction;

use catalog::{Catalog, LocalFile};
use link::SuperPeerLink;
use store::FileStore;

/// Cadence of the registration stream.
pub const REGISTRATION_TICK: Duration = Duration::from_secs(5);

/// Kernel-side accept backlog; overflow connections are refused.
const LISTEN_BACKLOG: u32 = 5;

/// One leaf process: the owned directory's catalog, the cache of downloads,
/// and this leaf's place in the overlay.
pub struct LeafNode {
    /// Listen port; doubles as this leaf's protocol id, so search results are
    /// directly dialable.
    pub port: i32,

    /// The one super-peer this leaf attaches to.
    pub super_peer_port: i32,

    method: ConsistencyMethod,
    ttr: Duration,

    pub catalog: Catalog,
    pub store: Arc<dyn FileStore>,
}

impl LeafNode {
    /// Build from the member record registered under CLI id `id`.
    pub fn new(id: i32, config: &OverlayConfig, store: Arc<dyn FileStore>) -> MeshResult<Self> {
        let record = config.leaf(id)?;
        Ok(Self {
            port: record.port,
            super_peer_port: record.super_peer_port,
            method: config.consistency,
            ttr: Duration::from_secs(config.ttr),
            catalog: Catalog::new(),
            store,
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

    /// Accept loop for inbound obtain/poll/invalidate dialogs.
    pub async fn run_server(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::info!(target: "filemesh::leaf::server", %addr, "client connected");
                    let me = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server::handle_connection(me, stream).await {
                            tracing::warn!(target: "filemesh::leaf::server", error = %e, "dialog dropped");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(target: "filemesh::leaf::server", error = %e, "failed client connection; ignoring")
                }
            }
        }
    }

    /// Prime the local catalog from disk. Also the first half of every
    /// registration tick; at startup a scan failure is fatal.
    pub async fn rescan_local(&self) -> MeshResult<Vec<LocalFile>> {
        let fresh = self.store.scan_local().await?;
        Ok(self.catalog.replace_local(fresh).await)
    }

    /// Registration loop: a tick every five seconds until the link dies. The
    /// link is never reconnected; inbound service continues without it.
    pub async fn registration_loop(self: Arc<Self>, link: Arc<Mutex<SuperPeerLink>>) {
        let mut tick = tokio::time::interval(REGISTRATION_TICK);
        loop {
            tick.tick().await;
            if let Err(e) = self.registration_tick(&link).await {
                tracing::warn!(error = %e, "registration tick aborted");
                if link.lock().await.is_broken() {
                    tracing::warn!("super-peer link down; registration stopped");
                    return;
                }
            }
        }
    }

    /// One tick of the registration stream.
    async fn registration_tick(&self, link: &Mutex<SuperPeerLink>) -> MeshResult<()> {
        let fresh = self.store.scan_local().await?;
        let previous = self.catalog.replace_local(fresh.clone()).await;

        let mut link = link.lock().await;

        // Local pass: unchanged files re-register; modified or vanished files
        // deregister carrying the new (or zero) version, which is the signal
        // the consistency engine consumes.
        for prev in &previous {
            let action = match fresh.iter().find(|f| f.filename == prev.filename) {
                Some(now) if now.version == prev.version => RegistrationAction::Register {
                    filename: prev.filename.clone(),
                },
                Some(now) => RegistrationAction::ModifyOrigin {
                    filename: prev.filename.clone(),
                    version: now.version,
                },
                None => RegistrationAction::ModifyOrigin {
                    filename: prev.filename.clone(),
                    version: 0,
                },
            };
            link.send(&action).await?;
        }

        // Cache pass: poll stale entries first (pull-from-origin only), then
        // advertise valid entries and retire invalid ones.
        for entry in self.catalog.remote_snapshot().await {
            let mut valid = entry.valid;
            if self.method == ConsistencyMethod::PullNode
                && valid
                && entry.last_poll.elapsed() >= self.ttr
            {
                valid = poll::poll_origin(entry.origin_leaf, &entry.origin_name, entry.version)
                    .await;
                if let Some(local_name) = self
                    .catalog
                    .set_poll_result(entry.origin_leaf, &entry.origin_name, valid)
                    .await
                {
                    tracing::info!(
                        origin = entry.origin_leaf,
                        filename = %entry.origin_name,
                        "stale cache unlinked"
                    );
                    if let Err(e) = self.store.unlink_cached(&local_name).await {
                        tracing::warn!(file = %local_name, error = %e, "unlink failed");
                    }
                }
            }

            if valid {
                link.send(&RegistrationAction::Register {
                    filename: entry.origin_name.clone(),
                })
                .await?;
            } else {
                link.send(&RegistrationAction::DropCache {
                    filename: entry.origin_name.clone(),
                })
                .await?;
                self.catalog
                    .remove_remote(entry.origin_leaf, &entry.origin_name)
                    .await;
            }
        }
        Ok(())
    }

    /// Search the overlay through the shared super-peer link.
    pub async fn search(
        &self,
        link: &Mutex<SuperPeerLink>,
        filename: &str,
    ) -> MeshResult<Vec<i32>> {
        link.lock().await.search(filename).await
    }

    /// Plain-text rendering of both catalogs for the `f` command.
    pub async fn catalogs_display(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "__________LOCAL FILES__________");
        for file in self.catalog.local_snapshot().await {
            let _ = writeln!(out, "{}...{}", file.filename, file.version);
        }
        let _ = writeln!(out, "__________REMOTE FILES_________");
        for entry in self.catalog.remote_snapshot().await {
            let _ = writeln!(
                out,
                "{}...{}...{}...{}...{}",
                entry.local_name, entry.origin_name, entry.origin_leaf, entry.valid, entry.version
            );
        }
        let _ = writeln!(out, "_______________________________");
        out
    }

    /// The obtain client refuses to dial this leaf itself.
    pub fn is_self(&self, port: i32) -> bool {
        port == self.port
    }
}

// Re-exported for the binary and tests.
pub use obtain::{obtain, ObtainOutcome};
