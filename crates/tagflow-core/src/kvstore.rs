//! KV snapshot-store collaborator contract (C9, optional).
//!
//! Grounded on `cdk-common::database::kvstore`'s `KVStore` trait: a
//! namespaced, async, JSON-at-the-edges key/value surface that a host
//! adapter backs with whatever it already has (sqlite, redb, a cloud KV
//! service). This crate never requires one — the push hub works perfectly
//! well as a pure in-memory engine — but when one is supplied the hub uses
//! it to persist the latest value per tag and to recover the set of known
//! tag ids across a restart.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::value::TagValueQueryResult;

/// The key under which a tag's latest snapshot is stored.
pub fn value_key(tag_id: &str) -> String {
    format!("value:{tag_id}")
}

/// The key under which the set of known tag ids (as a JSON array) is stored.
pub const TAGS_KEY: &str = "tags";

/// An optional collaborator the push hub persists the live stream's latest
/// values through. Deliberately not the system of record for historical or
/// aggregated queries (out of scope); it only ever holds one JSON blob per
/// key, matching the `kv_read`/`kv_write`/`kv_remove` shape of the teacher's
/// `KVStore` trait.
#[async_trait]
pub trait KvSnapshotStore: Send + Sync {
    /// Writes `value` (already serialized to a JSON string by the caller)
    /// under `key`.
    async fn write_raw(&self, key: &str, value: String) -> Result<()>;

    /// Reads the raw JSON string stored under `key`, if any.
    async fn read_raw(&self, key: &str) -> Result<Option<String>>;

    /// Removes whatever is stored under `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Serde convenience layer over [`KvSnapshotStore::write_raw`] /
/// [`KvSnapshotStore::read_raw`], mirroring the typed helpers the teacher
/// builds on top of its own raw byte-oriented KV trait.
#[async_trait]
pub trait KvSnapshotStoreExt: KvSnapshotStore {
    /// Serializes `value` to JSON and writes it under `key`.
    async fn write_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.write_raw(key, json).await
    }

    /// Reads and deserializes the JSON value stored under `key`, if any.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_raw(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Persists a tag's latest snapshot under its canonical `value:{id}` key.
    async fn write_snapshot(&self, snapshot: &TagValueQueryResult) -> Result<()> {
        self.write_json(&value_key(&snapshot.tag_id), snapshot).await
    }

    /// Reads back a tag's persisted snapshot, if any.
    async fn read_snapshot(&self, tag_id: &str) -> Result<Option<TagValueQueryResult>> {
        self.read_json(&value_key(tag_id)).await
    }
}

impl<T: KvSnapshotStore + ?Sized> KvSnapshotStoreExt for T {}
