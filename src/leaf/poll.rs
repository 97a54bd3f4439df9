//! PULL-N poller: version checks against a cached file's origin

use crate::error::MeshResult;
use crate::wire::{
    self, read_tag, write_filename, write_i64, write_tag, TransferRequest, ROLE_LEAF,
};

/// Ask `origin` whether `(origin_name, version)` still matches one of its
/// current local files. An unreachable origin or a failed dialog counts as
/// stale.
pub async fn poll_origin(origin: i32, origin_name: &str, version: i64) -> bool {
    match poll_dialog(origin, origin_name, version).await {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!(origin, error = %e, "poll failed; treating cache as stale");
            false
        }
    }
}

async fn poll_dialog(origin: i32, origin_name: &str, version: i64) -> MeshResult<bool> {
    let mut stream = wire::connect(origin).await?;
    write_tag(&mut stream, ROLE_LEAF).await?;
    write_tag(&mut stream, TransferRequest::Poll.tag()).await?;
    write_filename(&mut stream, origin_name).await?;
    write_i64(&mut stream, version).await?;
    Ok(read_tag(&mut stream).await? != 0)
}
