//! Polling driver (C7): synthesizes a push stream on top of a poll-only
//! upstream.
//!
//! Grounded on the teacher's `task::spawn` + `tokio::select!` cancellation
//! idiom used throughout `cdk-mintd`'s background workers, and on
//! `other_examples`' `rust-ethernet-ip` subscription manager, which drives
//! exactly this shape (a periodic read loop feeding a push-style fan-out) for
//! an industrial tag source that has no native subscribe mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::health::HealthStatus;
use crate::hub::PushHub;
use crate::value::{TagIdentifier, TagValueQueryResult};

/// A poll-only upstream: can read the current value of a page of tags, but
/// has no way to notify on change. `ReadSnapshotTagValues` in spec terms.
#[async_trait]
pub trait PollableSource: Send + Sync {
    /// Reads the current value of each tag in `tags`. Implementations may
    /// return fewer results than tags requested (e.g. a tag went offline);
    /// missing tags are simply not published this cycle.
    async fn read_snapshot_tag_values(&self, tags: &[TagIdentifier]) -> Result<Vec<TagValueQueryResult>, String>;
}

/// Periodically reads every currently-subscribed tag from a [`PollableSource`]
/// and feeds the results into a [`PushHub`], so subscribers observe the same
/// push-style delivery they would get from a natively event-driven upstream.
pub struct PollingDriver<Ctx = ()> {
    hub: PushHub<Ctx>,
    source: Arc<dyn PollableSource>,
    poll_interval: Duration,
    page_size: usize,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl<Ctx> PollingDriver<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    /// Creates a driver over `hub` and `source`, defaulting `poll_interval`
    /// and `page_size` to the hub's own [`crate::config::HubConfig`]; override
    /// either with [`PollingDriver::poll_interval`] / [`PollingDriver::page_size`]
    /// if the driver should run on a different cadence than the hub's config.
    pub fn new(hub: PushHub<Ctx>, source: Arc<dyn PollableSource>) -> Self {
        let poll_interval = hub.config().poll_interval;
        let page_size = hub.config().poll_page_size.max(1);
        Self {
            cancel: hub.shutdown_token(),
            hub,
            source,
            poll_interval,
            page_size,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cheap handle reporting whether [`PollingDriver::run`] is currently
    /// executing, for an embedding adapter's health probe to combine with
    /// [`crate::manager::SubscriptionManager::health`].
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// The hub's own health snapshot with `polling_active` filled in from
    /// this driver's running state.
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            polling_active: self.running.load(Ordering::Relaxed),
            ..self.hub.health()
        }
    }

    /// Overrides the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the page size used when paging through subscribed tags.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Runs the poll loop until the hub shuts down or `cancel` fires,
    /// whichever comes first, on the calling task (spawn this with
    /// [`crate::task::spawn`] to run it in the background).
    pub async fn run(self) {
        self.running.store(true, Ordering::Relaxed);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = self.cancel.cancelled() => {
                    self.running.store(false, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Spawns [`PollingDriver::run`] as a background task and returns its
    /// handle.
    pub fn spawn(self) -> JoinHandle<()> {
        crate::task::spawn(self.run())
    }

    /// Performs one poll cycle over every currently-subscribed tag, paged by
    /// `page_size`. Upstream errors are logged and otherwise swallowed: one
    /// bad poll should not take down the driver (§4.6).
    async fn poll_once(&self) {
        let tags = self.hub.subscribed_tags();
        for page in tags.chunks(self.page_size) {
            match self.source.read_snapshot_tag_values(page).await {
                Ok(values) => {
                    for value in values {
                        self.hub.value_received(value).await;
                    }
                }
                Err(err) => tagflow_log::log_warn!(
                    "{} ({} tag(s))",
                    crate::error::Error::UpstreamFailed(err),
                    page.len()
                ),
            }
        }
    }

    /// Performs an immediate out-of-band read for `tags`, bypassing the
    /// ticker. Intended to be called from an `on_tags_added` hook so a newly
    /// subscribed tag does not have to wait a full `poll_interval` for its
    /// first value.
    pub async fn poll_now(&self, tags: &[TagIdentifier]) {
        for page in tags.chunks(self.page_size) {
            match self.source.read_snapshot_tag_values(page).await {
                Ok(values) => {
                    for value in values {
                        self.hub.value_received(value).await;
                    }
                }
                Err(err) => tagflow_log::log_warn!(
                    "out-of-band {} ({} tag(s))",
                    crate::error::Error::UpstreamFailed(err),
                    page.len()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::HubConfig;
    use crate::hub::PushHubBuilder;
    use crate::manager::SubscriptionUpdate;
    use crate::value::{TagValueBuilder, Variant};
    use parking_lot::Mutex;

    struct FixedSource {
        values: Mutex<Vec<TagValueQueryResult>>,
    }

    #[async_trait]
    impl PollableSource for FixedSource {
        async fn read_snapshot_tag_values(&self, tags: &[TagIdentifier]) -> Result<Vec<TagValueQueryResult>, String> {
            let values = self.values.lock();
            Ok(values.iter().filter(|v| tags.iter().any(|t| t.id == v.tag_id)).cloned().collect())
        }
    }

    #[tokio::test]
    async fn poll_now_feeds_subscribed_tags_into_the_hub() {
        let hub: PushHub<()> = PushHubBuilder::new().config(HubConfig::default()).build();
        let handle = hub
            .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into()], Duration::ZERO, None)
            .await
            .unwrap();

        let tag = TagIdentifier::new("A", "A");
        let value = TagValueQueryResult::new(&tag, TagValueBuilder::new().value(Variant::Numeric(7.0)).build());
        let source = Arc::new(FixedSource { values: Mutex::new(vec![value]) });

        let driver = PollingDriver::new(hub.clone(), source);
        driver.poll_now(&[tag]).await;

        let delivered = handle.recv().await.unwrap();
        assert_eq!(delivered.value.value, Variant::Numeric(7.0));
    }

    #[tokio::test]
    async fn upstream_error_is_swallowed_not_propagated() {
        struct FailingSource;

        #[async_trait]
        impl PollableSource for FailingSource {
            async fn read_snapshot_tag_values(&self, _tags: &[TagIdentifier]) -> Result<Vec<TagValueQueryResult>, String> {
                Err("device offline".to_string())
            }
        }

        let hub: PushHub<()> = PushHubBuilder::new().build();
        let driver = PollingDriver::new(hub, Arc::new(FailingSource));
        driver.poll_now(&[TagIdentifier::new("A", "A")]).await; // must not panic
    }

    #[tokio::test]
    async fn health_reports_polling_active_while_run_executes() {
        let hub: PushHub<()> = PushHubBuilder::new().build();
        let source = Arc::new(FixedSource { values: Mutex::new(vec![]) });
        let driver = PollingDriver::new(hub, source).poll_interval(Duration::from_millis(10));

        assert!(!driver.health().polling_active);

        let cancel = driver.cancel.clone();
        let running = driver.running_flag();
        let task = tokio::spawn(driver.run());

        while !running.load(Ordering::Relaxed) {
            tokio::task::yield_now().await;
        }
        assert!(running.load(Ordering::Relaxed));

        cancel.cancel();
        task.await.unwrap();
        assert!(!running.load(Ordering::Relaxed));
    }
}
