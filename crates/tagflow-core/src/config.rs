//! Hub configuration (ambient A3).
//!
//! Collects every tunable named across spec.md §4/§9 into one `Default`-able
//! struct. There is deliberately no file/env loader here — that belongs to
//! whichever adapter-host binary embeds this crate, matching the core/host
//! split the rest of this system keeps everywhere else.

use std::time::Duration;

/// What happens to a tag's cached snapshot once its last subscriber departs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Keep serving the last-known value to the next subscriber.
    #[default]
    KeepAfterLastUnsubscribe,
    /// Drop the cached value so a future resubscribe starts cold.
    EvictOnLastUnsubscribe,
}

/// Tunables for [`crate::manager::SubscriptionManager`], [`crate::hub::PushHub`]
/// and [`crate::poller::PollingDriver`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bounded capacity of each subscriber's delivery queue (§4.2).
    pub channel_capacity: usize,
    /// How long an `is_initial` snapshot delivery may block for queue space
    /// before being dropped with a warning (§4.2).
    pub initial_delivery_timeout: Duration,
    /// Maximum number of newly-transitioned tags per first-subscriber
    /// callback batch (§4.4 "Batching on subscribe").
    pub subscribe_batch_size: usize,
    /// Polling driver period (§4.6).
    pub poll_interval: Duration,
    /// Polling driver page size for `ReadSnapshotTagValues` (§4.6).
    pub poll_page_size: usize,
    /// Optional ceiling on concurrently active subscriptions (§7
    /// `CapacityExceeded`). `None` means unbounded.
    pub max_subscriptions: Option<usize>,
    /// What happens to a tag's cached value after its last subscriber
    /// departs (§4.5).
    pub cache_policy: CachePolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: crate::channel::DEFAULT_CHANNEL_CAPACITY,
            initial_delivery_timeout: crate::channel::DEFAULT_INITIAL_DELIVERY_TIMEOUT,
            subscribe_batch_size: 100,
            poll_interval: Duration::from_secs(5),
            poll_page_size: 100,
            max_subscriptions: None,
            cache_policy: CachePolicy::KeepAfterLastUnsubscribe,
        }
    }
}
