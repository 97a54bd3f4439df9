//! File index: the mapping from filename to the leaves advertising it

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::RwLock;

/// Per-super-peer index of which attached or forwarded leaves advertise each
/// filename. Keys with no remaining leaves are erased, so an absent key and
/// an empty set are the same observation.
///
/// The lock is held only for the map operation itself; callers snapshot and
/// release before doing any network I/O.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: RwLock<HashMap<String, BTreeSet<i32>>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `leaf` under `filename`, creating the key on demand. Idempotent.
    pub async fn register(&self, leaf: i32, filename: &str) {
        let mut entries = self.entries.write().await;
        entries.entry(filename.to_owned()).or_default().insert(leaf);
    }

    /// Remove `leaf` from `filename`; the key is dropped once its set empties.
    pub async fn deregister(&self, leaf: i32, filename: &str) {
        let mut entries = self.entries.write().await;
        if let Some(set) = entries.get_mut(filename) {
            set.remove(&leaf);
            if set.is_empty() {
                entries.remove(filename);
            }
        }
    }

    /// Scrub a disconnecting leaf from every key.
    pub async fn cleanup(&self, leaf: i32) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, set| {
            set.remove(&leaf);
            !set.is_empty()
        });
    }

    /// All leaves currently advertising `filename`.
    pub async fn lookup(&self, filename: &str) -> Vec<i32> {
        let entries = self.entries.read().await;
        entries
            .get(filename)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.entries.read().await.contains_key(filename)
    }

    /// Ordered snapshot for the inspector dump.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<i32>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(name, set)| (name.clone(), set.iter().copied().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_deregister_restores_empty_index() {
        let index = FileIndex::new();
        index.register(8100, "a.txt").await;
        assert_eq!(index.lookup("a.txt").await, vec![8100]);

        index.deregister(8100, "a.txt").await;
        assert!(index.lookup("a.txt").await.is_empty());
        assert!(!index.contains("a.txt").await);
        assert!(index.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let index = FileIndex::new();
        index.register(8100, "a.txt").await;
        index.register(8100, "a.txt").await;
        assert_eq!(index.lookup("a.txt").await, vec![8100]);
    }

    #[tokio::test]
    async fn cleanup_scrubs_a_leaf_from_every_key() {
        let index = FileIndex::new();
        index.register(8100, "a.txt").await;
        index.register(8101, "a.txt").await;
        index.register(8100, "b.txt").await;

        index.cleanup(8100).await;
        assert_eq!(index.lookup("a.txt").await, vec![8101]);
        assert!(!index.contains("b.txt").await);
    }
}
