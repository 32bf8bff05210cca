//! Snapshot cache (C2): per-tag latest-value store with a monotonic-time gate.
//!
//! Producers may be multi-threaded and reorder; `add_or_update` is the
//! ordering oracle that guarantees downstream subscribers never see a
//! sample older than one already accepted for the same tag. The map is
//! striped across shards so the compare-and-replace step on one tag never
//! blocks readers/writers touching a different tag.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

use crate::value::{TagIdentifier, TagValueQueryResult};

const SHARD_COUNT: usize = 16;

/// A cache record: the canonical tag identity plus its latest accepted value.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    /// The canonical identity of the tag this entry tracks.
    pub tag: TagIdentifier,
    /// The latest accepted value for the tag.
    pub latest: TagValueQueryResult,
}

fn shard_of(tag_id: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    tag_id.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Striped, concurrent last-known-value cache.
#[derive(Debug)]
pub struct SnapshotCache {
    shards: Vec<RwLock<HashMap<String, SnapshotEntry>>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    /// Inserts or replaces the latest value for `tag`, rejecting updates
    /// that are strictly older than what is already cached.
    ///
    /// Ties (equal sample times) replace. Returns `true` if the entry was
    /// written, `false` if rejected as stale.
    pub fn add_or_update(&self, tag: &TagIdentifier, value: TagValueQueryResult) -> bool {
        let shard = &self.shards[shard_of(&tag.id)];
        let mut guard = shard.write();
        if let Some(existing) = guard.get(&tag.id) {
            if existing.latest.value.utc_sample_time > value.value.utc_sample_time {
                return false;
            }
        }
        guard.insert(
            tag.id.clone(),
            SnapshotEntry {
                tag: tag.clone(),
                latest: value,
            },
        );
        true
    }

    /// Returns the latest cached value for `tag_id`, if any.
    pub fn get(&self, tag_id: &str) -> Option<TagValueQueryResult> {
        let shard = &self.shards[shard_of(tag_id)];
        shard.read().get(tag_id).map(|entry| entry.latest.clone())
    }

    /// Removes the cached entry for `tag_id`. Returns `true` if one existed.
    pub fn remove(&self, tag_id: &str) -> bool {
        let shard = &self.shards[shard_of(tag_id)];
        shard.write().remove(tag_id).is_some()
    }

    /// Removes every cached entry whose tag id is not reported as having
    /// subscribers by `has_subscribers`. Used by the keep-or-evict cache
    /// policy (C6) after a last-subscriber-removed transition.
    pub fn remove_stale<F>(&self, has_subscribers: F)
    where
        F: Fn(&str) -> bool,
    {
        for shard in &self.shards {
            shard.write().retain(|tag_id, _| has_subscribers(tag_id));
        }
    }

    /// Total number of cached entries, for the health probe.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::value::{TagValueBuilder, Variant};
    use chrono::{TimeZone, Utc};

    fn value_at(tag: &TagIdentifier, secs: i64) -> TagValueQueryResult {
        let t = Utc.timestamp_opt(secs, 0).unwrap();
        TagValueQueryResult::new(tag, TagValueBuilder::new().value(Variant::Numeric(1.0)).sample_time(t).build())
    }

    #[test]
    fn rejects_strictly_older_sample() {
        let cache = SnapshotCache::new();
        let tag = TagIdentifier::new("A", "A");
        assert!(cache.add_or_update(&tag, value_at(&tag, 10)));
        assert!(!cache.add_or_update(&tag, value_at(&tag, 5)));
        assert_eq!(
            cache.get("A").unwrap().value.utc_sample_time,
            Utc.timestamp_opt(10, 0).unwrap()
        );
    }

    #[test]
    fn ties_replace() {
        let cache = SnapshotCache::new();
        let tag = TagIdentifier::new("A", "A");
        assert!(cache.add_or_update(&tag, value_at(&tag, 10)));
        assert!(cache.add_or_update(&tag, value_at(&tag, 10)));
    }

    #[test]
    fn remove_stale_evicts_unsubscribed_tags() {
        let cache = SnapshotCache::new();
        let a = TagIdentifier::new("A", "A");
        let b = TagIdentifier::new("B", "B");
        cache.add_or_update(&a, value_at(&a, 1));
        cache.add_or_update(&b, value_at(&b, 1));
        cache.remove_stale(|id| id == "A");
        assert!(cache.get("A").is_some());
        assert!(cache.get("B").is_none());
    }
}
