//! Bounded map from a source message to its relayed copies, and back.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::platform::{ChannelId, MessageId};

#[derive(Debug, Clone)]
struct SourceEntry {
    channel: ChannelId,
    copies: HashMap<ChannelId, MessageId>,
    seq: u64,
}

/// A source message and every copy relayed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source: MessageId,
    pub source_channel: ChannelId,
    pub copies: HashMap<ChannelId, MessageId>,
}

pub struct MappingStore {
    capacity: usize,
    seq: AtomicU64,
    forward: DashMap<MessageId, SourceEntry>,
    reverse: DashMap<MessageId, MessageId>,
}

impl MappingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
            forward: DashMap::new(),
            reverse: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Opens an empty entry for `source` so reactions and deletes resolve while copies are in flight.
    /// Returns false when `source` is already tracked.
    pub fn begin(&self, source: MessageId, channel: ChannelId) -> bool {
        match self.forward.entry(source) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(SourceEntry {
                    channel,
                    copies: HashMap::new(),
                    seq: self.seq.fetch_add(1, Ordering::Relaxed),
                });
            }
        }

        if self.forward.len() > self.capacity {
            self.evict_oldest();
        }
        true
    }

    /// Records one delivered copy. Returns false when the entry is gone (taken or evicted).
    pub fn record(&self, source: MessageId, target: ChannelId, relayed: MessageId) -> bool {
        let Some(mut entry) = self.forward.get_mut(&source) else {
            return false;
        };
        if entry.channel == target {
            return false;
        }
        entry.copies.insert(target, relayed);
        // Written under the entry guard so a concurrent take cannot strand it.
        self.reverse.insert(relayed, source);
        true
    }

    /// Canonical source id for a source or relayed message.
    pub fn source_of(&self, message: MessageId) -> Option<MessageId> {
        if self.forward.contains_key(&message) {
            return Some(message);
        }
        self.reverse.get(&message).map(|source| *source)
    }

    pub fn resolve(&self, message: MessageId) -> Option<Resolved> {
        let source = self.source_of(message)?;
        let entry = self.forward.get(&source)?;
        Some(Resolved {
            source,
            source_channel: entry.channel,
            copies: entry.copies.clone(),
        })
    }

    /// The message that represents `source` inside `channel`, if any.
    pub fn copy_in(&self, source: MessageId, channel: ChannelId) -> Option<MessageId> {
        let entry = self.forward.get(&source)?;
        if entry.channel == channel {
            return Some(source);
        }
        entry.copies.get(&channel).copied()
    }

    /// Removes `source` and every copy in one step and returns what was tracked.
    /// A `record` racing with this either lands in the result or fails.
    pub fn take(&self, source: MessageId) -> Option<Resolved> {
        let (_, entry) = self.forward.remove(&source)?;
        for relayed in entry.copies.values() {
            self.reverse.remove(relayed);
        }
        Some(Resolved {
            source,
            source_channel: entry.channel,
            copies: entry.copies,
        })
    }

    /// Drops the oldest entries down to 80% of capacity.
    fn evict_oldest(&self) {
        let keep = self.capacity - self.capacity / 5;
        let mut by_age: Vec<(u64, MessageId)> = self
            .forward
            .iter()
            .map(|entry| (entry.seq, *entry.key()))
            .collect();
        if by_age.len() <= keep {
            return;
        }

        by_age.sort_unstable();
        let excess = by_age.len() - keep;
        for (_, source) in by_age.into_iter().take(excess) {
            self.take(source);
        }
        tracing::debug!(evicted = excess, remaining = self.forward.len(), "message mappings evicted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_evicts_the_oldest_fifth() {
        let store = MappingStore::new(10);
        for id in 0..10 {
            store.begin(MessageId(id), ChannelId(1));
            store.record(MessageId(id), ChannelId(2), MessageId(100 + id));
        }
        assert_eq!(store.len(), 10);

        store.begin(MessageId(10), ChannelId(1));
        assert_eq!(store.len(), 8);
        for id in 0..3 {
            assert!(store.resolve(MessageId(id)).is_none());
            assert!(store.source_of(MessageId(100 + id)).is_none(), "reverse entry {id} kept");
        }
        for id in 3..=10 {
            assert_eq!(store.source_of(MessageId(id)), Some(MessageId(id)));
        }
        assert_eq!(store.source_of(MessageId(103)), Some(MessageId(3)));
    }

    #[test]
    fn sustained_inserts_stay_bounded() {
        let store = MappingStore::new(50);
        for id in 0..1_000 {
            store.begin(MessageId(id), ChannelId(1));
            assert!(store.len() <= 50);
        }
        assert!(store.source_of(MessageId(999)).is_some());
        assert!(store.source_of(MessageId(0)).is_none());
    }

    #[test]
    fn copies_resolve_to_their_source() {
        let store = MappingStore::new(10);
        store.begin(MessageId(1), ChannelId(10));
        assert!(store.record(MessageId(1), ChannelId(20), MessageId(2)));
        assert!(store.record(MessageId(1), ChannelId(30), MessageId(3)));

        let resolved = store.resolve(MessageId(3)).unwrap();
        assert_eq!(resolved.source, MessageId(1));
        assert_eq!(resolved.source_channel, ChannelId(10));
        assert_eq!(resolved.copies.len(), 2);

        assert_eq!(store.copy_in(MessageId(1), ChannelId(10)), Some(MessageId(1)));
        assert_eq!(store.copy_in(MessageId(1), ChannelId(20)), Some(MessageId(2)));
        assert_eq!(store.copy_in(MessageId(1), ChannelId(40)), None);
    }

    #[test]
    fn the_source_channel_never_becomes_a_target() {
        let store = MappingStore::new(10);
        store.begin(MessageId(1), ChannelId(10));
        assert!(!store.record(MessageId(1), ChannelId(10), MessageId(2)));
        assert!(store.resolve(MessageId(1)).unwrap().copies.is_empty());
        assert!(store.source_of(MessageId(2)).is_none());
    }

    #[test]
    fn take_removes_both_directions() {
        let store = MappingStore::new(10);
        store.begin(MessageId(1), ChannelId(10));
        store.record(MessageId(1), ChannelId(20), MessageId(2));
        let taken = store.take(MessageId(1)).unwrap();
        assert_eq!(taken.copies.get(&ChannelId(20)), Some(&MessageId(2)));
        assert!(store.take(MessageId(1)).is_none());

        assert!(store.is_empty());
        assert!(store.source_of(MessageId(2)).is_none());
        assert!(!store.record(MessageId(1), ChannelId(30), MessageId(3)));
        assert!(store.source_of(MessageId(3)).is_none());
    }

    #[test]
    fn a_tracked_source_is_not_reopened() {
        let store = MappingStore::new(10);
        assert!(store.begin(MessageId(1), ChannelId(10)));
        store.record(MessageId(1), ChannelId(20), MessageId(2));

        assert!(!store.begin(MessageId(1), ChannelId(10)));
        assert_eq!(store.resolve(MessageId(2)).unwrap().copies.len(), 1);
    }
}
