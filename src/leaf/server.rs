//! Inbound leaf server: obtain transfers, poll checks, pushed invalidations
//!
//! Connections here are one-shot. The role byte picks the dialog: `'0'` is an
//! invalidate link from a super-peer, `'1'` is another leaf asking to obtain
//! a file or poll a version.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{MeshError, MeshResult};
use crate::wire::{
    read_filename, read_i32, read_i64, read_tag, write_i32, write_i64, write_size, write_tag,
    TransferRequest, CHUNK_LEN, ROLE_LEAF, ROLE_PEER, SIZE_NOT_FOUND, SIZE_STAT_FAILED,
};

use super::LeafNode;

pub async fn handle_connection(node: Arc<LeafNode>, mut stream: TcpStream) -> MeshResult<()> {
    let role = read_tag(&mut stream).await?;
    match role {
        ROLE_PEER => handle_invalidate(&node, &mut stream).await,
        ROLE_LEAF => {
            let tag = read_tag(&mut stream).await?;
            match TransferRequest::from_tag(tag) {
                Some(TransferRequest::Obtain) => serve_obtain(&node, &mut stream).await,
                Some(TransferRequest::Poll) => serve_poll(&node, &mut stream).await,
                None => {
                    tracing::warn!(byte = tag, "unexpected transfer request; closing");
                    Err(MeshError::UnexpectedRequest { byte: tag })
                }
            }
        }
        byte => {
            tracing::warn!(byte, "unidentified connection; closing");
            Err(MeshError::UnexpectedRequest { byte })
        }
    }
}

/// A super-peer pushes `(origin, filename, version)`; a cache of that lineage
/// holding any other version is marked invalid and its bytes unlinked. The
/// next registration tick sends the deregister.
async fn handle_invalidate(node: &LeafNode, stream: &mut TcpStream) -> MeshResult<()> {
    let origin = read_i32(stream).await?;
    let filename = read_filename(stream).await?;
    let version = read_i64(stream).await?;

    if let Some(local_name) = node
        .catalog
        .invalidate_matching(origin, &filename, version)
        .await
    {
        tracing::info!(origin, filename = %filename, version, "cached copy invalidated");
        if let Err(e) = node.store.unlink_cached(&local_name).await {
            tracing::warn!(file = %local_name, error = %e, "unlink failed");
        }
    }
    Ok(())
}

/// Serve one file: owned copies first, then still-valid cached copies. The
/// reply is the 16-byte size (or a sentinel), the origin id, the version,
/// then the bytes in chunks.
async fn serve_obtain(node: &LeafNode, stream: &mut TcpStream) -> MeshResult<()> {
    let filename = read_filename(stream).await?;

    let source = if let Some(version) = node.catalog.local_version(&filename).await {
        Some((node.store.open_local(&filename).await, node.port, version))
    } else if let Some(entry) = node.catalog.find_valid_remote(&filename).await {
        Some((
            node.store.open_cached(&entry.local_name).await,
            entry.origin_leaf,
            entry.version,
        ))
    } else {
        None
    };

    let Some((file, origin, version)) = source else {
        tracing::info!(filename = %filename, "obtain miss");
        return write_size(stream, SIZE_NOT_FOUND).await;
    };
    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(filename = %filename, error = %e, "failed file open");
            return write_size(stream, SIZE_NOT_FOUND).await;
        }
    };
    let meta = match file.metadata().await {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(filename = %filename, error = %e, "failed file stat");
            return write_size(stream, SIZE_STAT_FAILED).await;
        }
    };

    write_size(stream, meta.len() as i64).await?;
    write_i32(stream, origin).await?;
    write_i64(stream, version).await?;

    let mut buf = [0u8; CHUNK_LEN];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
    }
    tracing::info!(filename = %filename, origin, size = meta.len(), "served file");
    Ok(())
}

/// PULL-N version check: reply `1` iff `(filename, version)` matches a
/// current local file exactly.
async fn serve_poll(node: &LeafNode, stream: &mut TcpStream) -> MeshResult<()> {
    let filename = read_filename(stream).await?;
    let version = read_i64(stream).await?;
    let valid = node.catalog.local_contains(&filename, version).await;
    tracing::info!(filename = %filename, version, valid, "poll answered");
    write_tag(stream, valid as u8).await
}
