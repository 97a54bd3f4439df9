//! Consistency engine pieces: the leaf invalidate link and the
//! pull-from-peers modification queue

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::MeshResult;
use crate::wire::{self, write_filename, write_i32, write_i64, write_tag, ROLE_PEER};

/// A modification reported by an origin leaf, queued until the next TTR drain
/// (pull-from-peers only).
#[derive(Debug, Clone, Serialize)]
pub struct PendingModification {
    pub filename: String,
    pub origin: i32,
    pub version: i64,
}

/// Queue of origin modifications awaiting the next compare broadcast.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Mutex<Vec<PendingModification>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, modification: PendingModification) {
        self.entries.lock().await.push(modification);
    }

    /// Take the whole queue under one lock; the caller does its network I/O
    /// with the lock released.
    pub async fn drain(&self) -> Vec<PendingModification> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    /// Copy for the inspector dump.
    pub async fn snapshot(&self) -> Vec<PendingModification> {
        self.entries.lock().await.clone()
    }
}

/// Open a short-lived invalidate link to one attached leaf and hand it the
/// origin's new version assertion.
pub async fn invalidate_leaf(
    leaf: i32,
    origin: i32,
    filename: &str,
    version: i64,
) -> MeshResult<()> {
    let mut stream = wire::connect(leaf).await?;
    write_tag(&mut stream, ROLE_PEER).await?;
    write_i32(&mut stream, origin).await?;
    write_filename(&mut stream, filename).await?;
    write_i64(&mut stream, version).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_empties_the_queue() {
        let queue = PendingQueue::new();
        queue
            .push(PendingModification {
                filename: "f".into(),
                origin: 8100,
                version: 100,
            })
            .await;
        queue
            .push(PendingModification {
                filename: "g".into(),
                origin: 8101,
                version: 200,
            })
            .await;

        let batch = queue.drain().await;
        assert_eq!(batch.len(), 2);
        assert!(queue.drain().await.is_empty());
        assert!(queue.snapshot().await.is_empty());
    }
}
