//! Outbound peer dialogs: TTL-bounded broadcast over the neighbor set
//!
//! Every broadcast visits all neighbors sequentially; the cycles this forms
//! in the peer graph are harmless because receivers suppress duplicate
//! message ids. A neighbor that cannot be reached is skipped with a log
//! entry, never retried.

use crate::error::MeshResult;
use crate::wire::{
    self, read_id_list, write_i64, write_tag, FloodHeader, PeerRequest, ROLE_PEER,
};

use super::message_ids::MessageIdStore;

/// Send a query to every neighbor and collect their id lists. The message id
/// is recorded locally before the first send so a copy that cycles back
/// through the graph is suppressed at this super-peer as well.
pub async fn query_neighbors(
    neighbors: &[i32],
    header: &FloodHeader,
    store: &MessageIdStore,
) -> Vec<i32> {
    store.record(header.message_id());
    let mut hits = Vec::new();
    for &peer in neighbors {
        match query_one(peer, header).await {
            Ok(mut ids) => hits.append(&mut ids),
            Err(e) => tracing::warn!(peer, error = %e, "neighbor query failed; ignoring"),
        }
    }
    hits
}

async fn query_one(peer: i32, header: &FloodHeader) -> MeshResult<Vec<i32>> {
    let mut stream = wire::connect(peer).await?;
    write_tag(&mut stream, ROLE_PEER).await?;
    write_tag(&mut stream, PeerRequest::Query.tag()).await?;
    header.write_to(&mut stream).await?;
    tracing::debug!(
        peer,
        origin = header.origin,
        seq = header.seq,
        "forwarded query"
    );
    read_id_list(&mut stream).await
}

/// Broadcast an invalidate or compare message to every neighbor. These carry
/// the flood header plus the new version and expect no reply.
pub async fn broadcast(
    request: PeerRequest,
    neighbors: &[i32],
    header: &FloodHeader,
    version: i64,
    store: &MessageIdStore,
) {
    store.record(header.message_id());
    for &peer in neighbors {
        if let Err(e) = send_one(request, peer, header, version).await {
            tracing::warn!(peer, error = %e, "neighbor broadcast failed; ignoring");
        }
    }
}

async fn send_one(
    request: PeerRequest,
    peer: i32,
    header: &FloodHeader,
    version: i64,
) -> MeshResult<()> {
    let mut stream = wire::connect(peer).await?;
    write_tag(&mut stream, ROLE_PEER).await?;
    write_tag(&mut stream, request.tag()).await?;
    header.write_to(&mut stream).await?;
    write_i64(&mut stream, version).await?;
    tracing::debug!(
        peer,
        origin = header.origin,
        seq = header.seq,
        request = ?request,
        "forwarded message"
    );
    Ok(())
}
