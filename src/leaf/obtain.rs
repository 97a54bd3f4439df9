//! Obtain client: download a file from another leaf into the cache

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{MeshError, MeshResult};
use crate::wire::{
    self, read_i32, read_i64, read_size, write_filename, write_tag, TransferRequest, CHUNK_LEN,
    ROLE_LEAF, SIZE_NOT_FOUND, SIZE_STAT_FAILED,
};

use super::catalog::DownloadRecord;
use super::LeafNode;

/// What an obtain left behind in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObtainOutcome {
    Downloaded { local_name: String, size: u64 },
    /// A cache of the same lineage already existed; it was refreshed.
    Updated { local_name: String, version: i64 },
}

/// Download `filename` from the leaf listening on `target`. The serving side
/// reports the file's true origin and version, which is what the new cache
/// entry records; a re-download chain therefore keeps polling the real
/// origin.
pub async fn obtain(node: &LeafNode, target: i32, filename: &str) -> MeshResult<ObtainOutcome> {
    let mut stream = wire::connect(target).await?;
    write_tag(&mut stream, ROLE_LEAF).await?;
    write_tag(&mut stream, TransferRequest::Obtain.tag()).await?;
    write_filename(&mut stream, filename).await?;

    let size = read_size(&mut stream).await?;
    if size == SIZE_NOT_FOUND {
        return Err(MeshError::FileNotFound {
            filename: filename.to_owned(),
            port: target,
        });
    }
    if size == SIZE_STAT_FAILED {
        return Err(MeshError::StatFailed {
            filename: filename.to_owned(),
            port: target,
        });
    }

    let origin = read_i32(&mut stream).await?;
    let version = read_i64(&mut stream).await?;

    let local_name = node.catalog.resolve_local_name(filename, origin).await;
    let mut file = node.store.create_cached(&local_name).await?;

    let mut remaining = size as u64;
    let mut buf = [0u8; CHUNK_LEN];
    while remaining > 0 {
        let want = remaining.min(CHUNK_LEN as u64) as usize;
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(MeshError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "transfer ended before the advertised size",
            )));
        }
        file.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    file.flush().await?;

    tracing::info!(filename, origin, version, size, "file download successful");
    match node
        .catalog
        .record_download(&local_name, filename, origin, version)
        .await
    {
        DownloadRecord::Created => Ok(ObtainOutcome::Downloaded {
            local_name,
            size: size as u64,
        }),
        DownloadRecord::Updated => Ok(ObtainOutcome::Updated {
            local_name,
            version,
        }),
    }
}
