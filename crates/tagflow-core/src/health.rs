//! Liveness/diagnostics probe (ambient A4).
//!
//! A cheap, lock-brief snapshot an adapter host can expose on its own health
//! endpoint; this crate has no transport of its own (out of scope per
//! spec.md's "Out of scope entirely" list), so this is the full extent of
//! its health surface.

use serde::Serialize;

/// Point-in-time snapshot of the engine's internal state.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Number of currently active subscriptions.
    pub subscriber_count: usize,
    /// Number of distinct tags with at least one subscriber.
    pub subscribed_tag_count: usize,
    /// Number of entries currently held in the snapshot cache.
    pub cache_size: usize,
    /// Whether a polling driver is currently attached and running.
    pub polling_active: bool,
}
