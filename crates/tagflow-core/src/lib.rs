//! Real-time tag-value snapshot/push engine for industrial-data adapters.
//!
//! An adapter bridges one control-system protocol to a common tag model.
//! This crate is the piece every such adapter needs and none of them should
//! reimplement: given a stream of freshly-read tag values, keep the latest
//! one per tag (the snapshot cache, C2) and fan it out to whoever is
//! currently interested (subscription channels, C3, fanned out by the
//! subscription manager, C5, through the topic index, C4). The push hub
//! (C6) composes those into the one type adapters actually hold, and the
//! polling driver (C7) lets an adapter whose upstream can only be polled
//! still offer the same push experience to its subscribers.
//!
//! ```text
//! producer --ValueReceived--> PushHub --fan-out--> SubscriptionHandle::recv
//!                                 |
//!                                 `--write-through--> KvSnapshotStore (optional)
//! ```
//!
//! What this crate is not: a durable event log, a replication mechanism, or
//! a historian. A subscriber that was offline when a value arrived simply
//! never sees that value — it will see whatever is current once it
//! subscribes. See the module docs on [`manager`] and [`hub`] for the exact
//! ordering and backpressure guarantees this does provide.

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod kvstore;
pub mod manager;
pub mod poller;
pub mod resolver;
pub mod task;
pub mod topic_index;
pub mod value;

pub use cache::SnapshotCache;
pub use config::{CachePolicy, HubConfig};
pub use error::{Error, Result};
pub use hub::{PushHub, PushHubBuilder};
pub use kvstore::{KvSnapshotStore, KvSnapshotStoreExt};
pub use manager::{NoopHooks, SubscriptionHandle, SubscriptionHooks, SubscriptionManager, SubscriptionUpdate, UpdateAction};
pub use poller::{PollableSource, PollingDriver};
pub use resolver::{IdentityResolver, TagResolver};
pub use value::{Property, StatusCode, TagIdentifier, TagValue, TagValueBuilder, TagValueQueryResult, Variant};
