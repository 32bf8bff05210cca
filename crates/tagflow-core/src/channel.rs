//! Subscription channel (C3): a per-subscriber buffered queue with
//! optional publish-interval coalescing.
//!
//! Built directly on `VecDeque` + `Notify` rather than `tokio::sync::mpsc`
//! because the drop-oldest backpressure policy (§4.2) requires popping an
//! already-queued element, which `mpsc::Sender::try_send` cannot do.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::value::{TagIdentifier, TagValueQueryResult};

/// Default bounded capacity of a subscriber's delivery queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Default time an `is_initial` delivery is allowed to block for queue
/// space before being dropped with a warning.
pub const DEFAULT_INITIAL_DELIVERY_TIMEOUT: Duration = Duration::from_millis(250);

struct Coalescer {
    interval: Duration,
    pending: Mutex<HashMap<String, TagValueQueryResult>>,
}

/// A subscriber's delivery queue plus its topic membership set.
///
/// Exclusively owned by one [`crate::manager::Subscription`]; the manager
/// only ever holds a reference to it for fan-out and topic bookkeeping.
pub struct SubscriptionChannel {
    capacity: usize,
    queue: Mutex<VecDeque<TagValueQueryResult>>,
    notify: Notify,
    closed: AtomicBool,
    topics: RwLock<BTreeSet<TagIdentifier>>,
    coalescer: Option<Coalescer>,
    initial_delivery_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("capacity", &self.capacity)
            .field("len", &self.queue.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SubscriptionChannel {
    /// Creates a new channel with the given capacity and publish interval.
    /// A `publish_interval` of `Duration::ZERO` disables coalescing.
    pub fn new(capacity: usize, publish_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            topics: RwLock::new(BTreeSet::new()),
            coalescer: if publish_interval.is_zero() {
                None
            } else {
                Some(Coalescer {
                    interval: publish_interval,
                    pending: Mutex::new(HashMap::new()),
                })
            },
            initial_delivery_timeout: DEFAULT_INITIAL_DELIVERY_TIMEOUT,
            cancel,
        }
    }

    /// Overrides the default `is_initial` delivery timeout.
    pub fn with_initial_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.initial_delivery_timeout = timeout;
        self
    }

    /// Whether this channel coalesces live publishes on a fixed interval.
    pub fn is_coalescing(&self) -> bool {
        self.coalescer.is_some()
    }

    /// The configured coalescing period, if any.
    pub fn publish_interval(&self) -> Option<Duration> {
        self.coalescer.as_ref().map(|c| c.interval)
    }

    /// Adds topics to this channel's membership set.
    pub fn add_topics(&self, topics: impl IntoIterator<Item = TagIdentifier>) {
        let mut guard = self.topics.write();
        for topic in topics {
            guard.insert(topic);
        }
    }

    /// Removes a topic from the membership set. Returns whether it was
    /// present.
    pub fn remove_topic(&self, topic: &TagIdentifier) -> bool {
        self.topics.write().remove(topic)
    }

    /// Returns whether `topic` is in this channel's membership set.
    pub fn has_topic(&self, topic: &TagIdentifier) -> bool {
        self.topics.read().contains(topic)
    }

    /// A snapshot of the current topic membership set.
    pub fn topics_snapshot(&self) -> Vec<TagIdentifier> {
        self.topics.read().iter().cloned().collect()
    }

    /// Publishes a value to this subscriber.
    ///
    /// `is_initial` marks a snapshot-on-subscribe delivery: it bypasses
    /// coalescing, is queued ahead of any live traffic already buffered, and
    /// is only ever dropped after blocking for `initial_delivery_timeout`.
    ///
    /// Returns `true` if the value was accepted without loss; `false` if an
    /// older buffered value (or, for `is_initial`, the delivery itself) was
    /// dropped to make room. This is a diagnostic signal only — the
    /// subscription is never cancelled because of it.
    pub async fn publish(&self, value: TagValueQueryResult, is_initial: bool) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        if is_initial {
            return self.publish_initial(value).await;
        }

        if let Some(coalescer) = &self.coalescer {
            let tag_id = value.tag_id.clone();
            coalescer.pending.lock().insert(tag_id, value);
            return true;
        }

        self.enqueue_drop_oldest(value)
    }

    async fn publish_initial(&self, value: TagValueQueryResult) -> bool {
        let deadline = tokio::time::Instant::now() + self.initial_delivery_timeout;
        loop {
            {
                let mut guard = self.queue.lock();
                if guard.len() < self.capacity {
                    guard.push_front(value);
                    drop(guard);
                    self.notify.notify_one();
                    return true;
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tagflow_log::log_warn!("dropping initial snapshot delivery: queue stayed full");
                return false;
            }

            tokio::select! {
                _ = tokio::time::sleep(remaining.min(Duration::from_millis(10))) => {}
                _ = self.cancel.cancelled() => return false,
            }
        }
    }

    fn enqueue_drop_oldest(&self, value: TagValueQueryResult) -> bool {
        let mut guard = self.queue.lock();
        let accepted = if guard.len() >= self.capacity {
            guard.pop_front();
            false
        } else {
            true
        };
        guard.push_back(value);
        drop(guard);
        self.notify.notify_one();
        if !accepted {
            tagflow_log::log_warn!("{}", crate::error::Error::QueueFull);
        }
        accepted
    }

    /// Drains the coalescing map and enqueues one batch entry per tag.
    /// Emits nothing if the map is empty. Called by the coalescing ticker
    /// task owned by the [`crate::manager::Subscription`] that created this
    /// channel.
    pub fn flush_coalesced_batch(&self) {
        let Some(coalescer) = &self.coalescer else {
            return;
        };
        let batch: Vec<_> = {
            let mut pending = coalescer.pending.lock();
            pending.drain().map(|(_, v)| v).collect()
        };
        for value in batch {
            self.enqueue_drop_oldest(value);
        }
    }

    /// Pops the next value in FIFO order, waiting until one is available or
    /// the channel is cancelled/completed. Returns `None` once the channel
    /// is closed and drained.
    pub async fn recv(&self) -> Option<TagValueQueryResult> {
        loop {
            if let Some(value) = self.queue.lock().pop_front() {
                return Some(value);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.cancel.cancelled() => {
                    return self.queue.lock().pop_front();
                }
            }
        }
    }

    /// Marks the channel complete: no further values will be accepted, and
    /// pending `recv` calls observe `None` once drained.
    pub fn complete(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Current queue depth, for diagnostics/tests.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue currently holds no buffered values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
