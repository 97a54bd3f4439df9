//! Duplicate suppression for flooded messages

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// `(origin, sequence_number)` pair identifying one flooded message.
pub type MessageId = (i32, i32);

/// How long a message id is remembered. Any reply path has at most this long
/// to land before the store forgets the id and a rebroadcast would be
/// processed again.
pub const RETENTION: Duration = Duration::from_secs(60);

/// Seen-message store keyed by message id, each entry carrying its first
/// sighting time so the sweeper can age it out.
#[derive(Debug, Default)]
pub struct MessageIdStore {
    seen: DashMap<MessageId, Instant>,
}

impl MessageIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` if unseen. Returns false when the id was already present,
    /// in which case the caller drops the message instead of processing it.
    pub fn first_sighting(&self, id: MessageId) -> bool {
        match self.seen.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        }
    }

    /// Record an id this super-peer is itself broadcasting, so a copy that
    /// cycles back through the graph is suppressed here too.
    pub fn record(&self, id: MessageId) {
        self.seen.insert(id, Instant::now());
    }

    /// Evict every id older than the retention window.
    pub fn sweep(&self) {
        self.sweep_older_than(RETENTION);
    }

    fn sweep_older_than(&self, retention: Duration) {
        let now = Instant::now();
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) <= retention);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Ordered snapshot for the inspector dump.
    pub fn snapshot(&self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self.seen.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_message_id_is_processed_at_most_once() {
        let store = MessageIdStore::new();
        assert!(store.first_sighting((8100, 1)));
        assert!(!store.first_sighting((8100, 1)));
        assert!(store.first_sighting((8100, 2)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn recorded_ids_suppress_cycled_copies() {
        let store = MessageIdStore::new();
        store.record((8100, 7));
        assert!(!store.first_sighting((8100, 7)));
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let store = MessageIdStore::new();
        store.record((8100, 1));
        std::thread::sleep(Duration::from_millis(5));

        store.sweep_older_than(Duration::from_secs(60));
        assert_eq!(store.len(), 1);

        store.sweep_older_than(Duration::ZERO);
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_ordered() {
        let store = MessageIdStore::new();
        store.record((8101, 2));
        store.record((8100, 9));
        assert_eq!(store.snapshot(), vec![(8100, 9), (8101, 2)]);
    }
}
