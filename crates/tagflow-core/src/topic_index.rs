//! Topic index & reference counting (C4).
//!
//! Subscriber set and refcount for a tag are kept as one entry in one map
//! under one mutex (design note §9): splitting them across two maps/locks
//! invites a TOCTOU window between "Add" and the first/last-subscriber
//! transition decision. Refcount is simply the subscriber set's length, so
//! there is nothing to keep in sync.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::value::TagIdentifier;

/// Identifies one subscription for topic-index membership purposes.
pub type SubscriptionId = u64;

#[derive(Default)]
struct Entry {
    subscribers: HashSet<SubscriptionId>,
}

/// Tag -> subscriber-set index with refcount-transition detection.
#[derive(Default)]
pub struct TopicIndex {
    inner: Mutex<HashMap<TagIdentifier, Entry>>,
}

impl std::fmt::Debug for TopicIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicIndex")
            .field("tag_count", &self.inner.lock().len())
            .finish()
    }
}

impl TopicIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sub_id` as a subscriber of `tag`. Returns `true` if the
    /// refcount transitioned 0→1 (this was the first subscriber).
    pub fn add(&self, tag: &TagIdentifier, sub_id: SubscriptionId) -> bool {
        let mut guard = self.inner.lock();
        let entry = guard.entry(tag.clone()).or_default();
        let was_empty = entry.subscribers.is_empty();
        entry.subscribers.insert(sub_id);
        was_empty
    }

    /// Unregisters `sub_id` from `tag`. Returns `true` if the refcount
    /// transitioned 1→0 (this was the last subscriber); the entry is
    /// removed from the map in that case, preserving the invariant that an
    /// entry exists iff refcount > 0.
    pub fn remove(&self, tag: &TagIdentifier, sub_id: SubscriptionId) -> bool {
        let mut guard = self.inner.lock();
        let Some(entry) = guard.get_mut(tag) else {
            return false;
        };
        let removed = entry.subscribers.remove(&sub_id);
        if !removed {
            return false;
        }
        if entry.subscribers.is_empty() {
            guard.remove(tag);
            true
        } else {
            false
        }
    }

    /// The subscriber ids currently registered for `tag_id`.
    pub fn subscribers(&self, tag_id: &str) -> Vec<SubscriptionId> {
        let guard = self.inner.lock();
        guard
            .iter()
            .find(|(tag, _)| tag.id == tag_id)
            .map(|(_, entry)| entry.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current refcount for `tag_id` (0 if unknown).
    pub fn refcount(&self, tag_id: &str) -> usize {
        let guard = self.inner.lock();
        guard
            .iter()
            .find(|(tag, _)| tag.id == tag_id)
            .map(|(_, entry)| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Whether `tag_id` currently has at least one subscriber.
    pub fn has_subscribers(&self, tag_id: &str) -> bool {
        self.refcount(tag_id) > 0
    }

    /// Snapshot of every tag with refcount > 0.
    pub fn subscribed_tags(&self) -> Vec<TagIdentifier> {
        self.inner.lock().keys().cloned().collect()
    }

    /// Number of distinct tags with at least one subscriber.
    pub fn tag_count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn first_add_transitions_0_to_1() {
        let index = TopicIndex::new();
        let tag = TagIdentifier::new("A", "A");
        assert!(index.add(&tag, 1));
        assert!(!index.add(&tag, 2)); // second subscriber, no transition
        assert_eq!(index.refcount("A"), 2);
    }

    #[test]
    fn last_remove_transitions_1_to_0() {
        let index = TopicIndex::new();
        let tag = TagIdentifier::new("A", "A");
        index.add(&tag, 1);
        index.add(&tag, 2);
        assert!(!index.remove(&tag, 1));
        assert!(index.remove(&tag, 2));
        assert_eq!(index.refcount("A"), 0);
        assert!(!index.has_subscribers("A"));
    }

    #[test]
    fn unsubscribe_from_unknown_tag_is_a_no_op() {
        let index = TopicIndex::new();
        let tag = TagIdentifier::new("A", "A");
        assert!(!index.remove(&tag, 1));
    }

    #[test]
    fn entry_absent_once_refcount_hits_zero() {
        let index = TopicIndex::new();
        let tag = TagIdentifier::new("A", "A");
        index.add(&tag, 1);
        index.remove(&tag, 1);
        assert_eq!(index.tag_count(), 0);
    }
}
