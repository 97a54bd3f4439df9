//! The leaf's long-lived session with its super-peer
//!
//! One stream carries everything a leaf says to its super-peer: the
//! registration bursts, interactive searches, and inspector requests. The
//! link is deliberately never reconnected; once a write fails the leaf keeps
//! serving inbound requests but can no longer register.

use tokio::net::TcpStream;

use crate::error::{MeshError, MeshResult};
use crate::wire::{
    self, read_id_list, write_filename, write_i32, write_tag, RegistrationAction, SessionRequest,
    ROLE_LEAF,
};

pub struct SuperPeerLink {
    stream: TcpStream,
    broken: bool,
}

impl SuperPeerLink {
    /// Dial the super-peer and identify this leaf by its port.
    pub async fn connect(super_peer_port: i32, leaf_port: i32) -> MeshResult<Self> {
        let mut stream = wire::connect(super_peer_port).await?;
        write_tag(&mut stream, ROLE_LEAF).await?;
        write_i32(&mut stream, leaf_port).await?;
        Ok(Self {
            stream,
            broken: false,
        })
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send one registration action.
    pub async fn send(&mut self, action: &RegistrationAction) -> MeshResult<()> {
        self.guard()?;
        let result = action.write_to(&mut self.stream).await;
        self.note(result)
    }

    /// Search the overlay for `filename`; returns the ports advertising it.
    pub async fn search(&mut self, filename: &str) -> MeshResult<Vec<i32>> {
        self.guard()?;
        let result = async {
            write_tag(&mut self.stream, SessionRequest::Search.tag()).await?;
            write_filename(&mut self.stream, filename).await?;
            read_id_list(&mut self.stream).await
        }
        .await;
        self.note(result)
    }

    /// Ask the super-peer to dump one of its stores to its own log.
    pub async fn inspect(&mut self, request: SessionRequest) -> MeshResult<()> {
        self.guard()?;
        let result = write_tag(&mut self.stream, request.tag()).await;
        self.note(result)
    }

    /// Best-effort clean goodbye; the super-peer scrubs this leaf from its
    /// index either way.
    pub async fn disconnect(&mut self) {
        if !self.broken {
            let _ = write_tag(&mut self.stream, SessionRequest::Disconnect.tag()).await;
            self.broken = true;
        }
    }

    fn guard(&self) -> MeshResult<()> {
        if self.broken {
            Err(MeshError::LinkDown)
        } else {
            Ok(())
        }
    }

    fn note<T>(&mut self, result: MeshResult<T>) -> MeshResult<T> {
        if result.is_err() {
            self.broken = true;
        }
        result
    }
}
