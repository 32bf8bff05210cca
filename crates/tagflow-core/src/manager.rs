//! Subscription manager (C5): subscribe/unsubscribe, fan-out, and the
//! serialized first/last-subscriber callback pipeline.
//!
//! Grounded on the teacher's `cdk::pub_sub::Manager` (`ActiveSubscription`
//! cleans itself up on `Drop` by notifying a background consumer task over an
//! mpsc channel) and `cdk-common::pub_sub::Pubsub` (one `Arc`-wrapped inner
//! struct cloned per handle). The callback-serialization channel here plays
//! the same role `Manager::remove_subscription`'s channel plays there: every
//! first/last-subscriber transition is processed by exactly one task, so two
//! concurrent `Subscribe` calls for the same tag can never both believe they
//! were first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cache::SnapshotCache;
use crate::config::{CachePolicy, HubConfig};
use crate::error::{Error, Result};
use crate::resolver::TagResolver;
use crate::task;
use crate::topic_index::{SubscriptionId, TopicIndex};
use crate::value::{TagIdentifier, TagValueQueryResult};
use crate::channel::SubscriptionChannel;

/// First/last-subscriber transition hooks, plus the topic-matching rule used
/// to fan values out to subscribers.
///
/// Replaces the inheritance-based virtual hooks an object-oriented port of
/// this engine would reach for with a single injectable trait object,
/// matching how the teacher's `OnNewSubscription` trait is threaded through
/// `cdk::pub_sub::Manager`.
#[async_trait]
pub trait SubscriptionHooks: Send + Sync {
    /// Invoked once per batch of tags that just transitioned 0→1
    /// subscribers. A subscribe call that created new transitions awaits
    /// completion of every batch it produced before returning to its caller.
    async fn on_tags_added(&self, _tags: &[TagIdentifier]) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Invoked once per batch of tags that just transitioned 1→0
    /// subscribers. Never awaited by the caller that triggered it.
    async fn on_tags_removed(&self, _tags: &[TagIdentifier]) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Whether `subscribed` (one of a subscription's topics) matches
    /// `incoming` (a concrete, non-wildcard tag reported by a producer).
    /// Default is exact-id equality, matching the topic index's own fast
    /// path; overriding this implies `uses_wildcard_match` should return
    /// `true` so the manager knows to fall back to the O(topics-per-sub)
    /// scan instead of the direct index lookup.
    fn is_topic_match(&self, subscribed: &TagIdentifier, incoming: &TagIdentifier) -> bool {
        subscribed == incoming
    }

    /// Whether `ValueReceived` must scan every subscription's topic set
    /// through [`SubscriptionHooks::is_topic_match`] rather than using the
    /// direct topic-index lookup. `false` (the default) is the common case:
    /// subscriptions name concrete tags and the index lookup alone is exact.
    fn uses_wildcard_match(&self) -> bool {
        false
    }
}

/// No-op hooks: exact-match fan-out, no side effects on subscribe/unsubscribe.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SubscriptionHooks for NoopHooks {}

/// A request to add or remove a tag subscription on an already-live
/// subscription, as would arrive off an update stream from a transport layer.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    /// The tag name to resolve and (un)subscribe.
    pub tag_name: String,
    /// Which direction this update goes.
    pub action: UpdateAction,
}

/// Direction of a [`SubscriptionUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Add the named tag to the subscription.
    Subscribe,
    /// Remove the named tag from the subscription.
    Unsubscribe,
}

struct ChangeEvent {
    topics: Vec<TagIdentifier>,
    added: bool,
    completion: oneshot::Sender<std::result::Result<(), String>>,
}

struct SubscriptionEntry<Ctx> {
    id: SubscriptionId,
    context: Ctx,
    channel: Arc<SubscriptionChannel>,
    cancel: CancellationToken,
}

struct Inner<Ctx> {
    cache: Arc<SnapshotCache>,
    topic_index: Arc<TopicIndex>,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<SubscriptionEntry<Ctx>>>>,
    next_id: AtomicU64,
    active_count: AtomicUsize,
    hooks: Arc<dyn SubscriptionHooks>,
    resolver: Arc<dyn TagResolver>,
    config: HubConfig,
    shutdown_token: CancellationToken,
    change_tx: mpsc::UnboundedSender<ChangeEvent>,
    change_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

/// The subscription engine: owns the snapshot cache, the topic index, and
/// every live subscription's channel. Cheaply `Clone`-able; every clone
/// shares the same underlying state (mirrors `Pubsub<S>` holding an `Arc`
/// inner struct rather than being `Arc`-wrapped by its callers).
pub struct SubscriptionManager<Ctx = ()> {
    inner: Arc<Inner<Ctx>>,
}

impl<Ctx> Clone for SubscriptionManager<Ctx> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<Ctx> std::fmt::Debug for SubscriptionManager<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active_subscriptions", &self.inner.active_count.load(Ordering::Relaxed))
            .field("subscribed_tags", &self.inner.topic_index.tag_count())
            .finish()
    }
}

impl<Ctx> SubscriptionManager<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    /// Builds a manager with the given config, resolver and hooks, sharing
    /// `cache` with whatever else needs direct read access to it (e.g. a
    /// poller priming reads before the first subscriber arrives).
    pub fn new(
        config: HubConfig,
        resolver: Arc<dyn TagResolver>,
        hooks: Arc<dyn SubscriptionHooks>,
        cache: Arc<SnapshotCache>,
    ) -> Self {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let hooks_for_task = hooks.clone();
        let change_task = task::spawn(run_change_consumer(change_rx, hooks_for_task));

        Self {
            inner: Arc::new(Inner {
                cache,
                topic_index: Arc::new(TopicIndex::new()),
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                active_count: AtomicUsize::new(0),
                hooks,
                resolver,
                config,
                shutdown_token: CancellationToken::new(),
                change_tx,
                change_task: parking_lot::Mutex::new(Some(change_task)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Direct access to the snapshot cache, for collaborators (pollers, the
    /// push hub) that need to prime or inspect it outside the subscribe path.
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.inner.cache
    }

    /// Direct access to the topic index, for collaborators that need to know
    /// which tags currently have subscribers (e.g. the polling driver's page
    /// selection).
    pub fn topic_index(&self) -> &Arc<TopicIndex> {
        &self.inner.topic_index
    }

    /// This manager's configuration, for collaborators (e.g. the polling
    /// driver) that should default to the same tunables rather than hardcode
    /// their own.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Every tag currently subscribed by at least one subscription.
    pub fn subscribed_tags(&self) -> Vec<TagIdentifier> {
        self.inner.topic_index.subscribed_tags()
    }

    /// Current count of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.active_count.load(Ordering::Relaxed)
    }

    /// A token cancelled when [`SubscriptionManager::shutdown`] runs; every
    /// subscription's own cancellation token is a child of this one.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown_token.clone()
    }

    /// Creates a subscription for `tag_names` (resolved through the injected
    /// [`TagResolver`]), optionally coalescing live publishes on
    /// `publish_interval`, and optionally driven by an `updates` stream that
    /// adds/removes topics over the subscription's lifetime.
    ///
    /// Resolver failure or a failing `on_tags_added` callback fails this call
    /// and atomically disposes the partially-created subscription; the
    /// caller never observes a half-alive subscription.
    pub async fn subscribe<U>(
        &self,
        context: Ctx,
        tag_names: Vec<String>,
        publish_interval: Duration,
        updates: Option<U>,
    ) -> Result<SubscriptionHandle<Ctx>>
    where
        U: Stream<Item = SubscriptionUpdate> + Send + Unpin + 'static,
    {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::AlreadyDisposed);
        }
        if tag_names.iter().any(|name| name.trim().is_empty()) {
            return Err(Error::InvalidArgument("tag name must not be blank".to_string()));
        }
        if let Some(max) = self.inner.config.max_subscriptions {
            if self.inner.active_count.load(Ordering::Acquire) >= max {
                return Err(Error::CapacityExceeded(max));
            }
        }

        let cancel = self.inner.shutdown_token.child_token();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::new(
            SubscriptionChannel::new(self.inner.config.channel_capacity, publish_interval, cancel.clone())
                .with_initial_delivery_timeout(self.inner.config.initial_delivery_timeout),
        );

        let entry = Arc::new(SubscriptionEntry {
            id,
            context,
            channel: channel.clone(),
            cancel: cancel.clone(),
        });
        self.inner.subscriptions.write().insert(id, entry);
        self.inner.active_count.fetch_add(1, Ordering::Relaxed);

        let handle = SubscriptionHandle {
            id,
            manager: self.clone(),
            channel: channel.clone(),
        };

        if !tag_names.is_empty() {
            if let Err(err) = self.add_topics(id, &channel, tag_names, &cancel).await {
                self.dispose(id);
                return Err(err);
            }
        }

        if !publish_interval.is_zero() {
            self.spawn_coalescing_ticker(channel.clone(), publish_interval, cancel.clone());
        }

        if let Some(updates) = updates {
            self.spawn_update_listener(id, updates, cancel.clone());
        }

        Ok(handle)
    }

    /// Adds a single named topic to an already-live subscription (the path
    /// an update-stream listener or a transport layer drives dynamically).
    /// Returns `Err(AlreadyDisposed)` if the subscription no longer exists.
    pub async fn add_topic(&self, id: SubscriptionId, tag_name: &str) -> Result<()> {
        if tag_name.trim().is_empty() {
            return Err(Error::InvalidArgument("tag name must not be blank".to_string()));
        }
        let entry = { self.inner.subscriptions.read().get(&id).cloned() };
        let Some(entry) = entry else {
            return Err(Error::AlreadyDisposed);
        };
        self.add_topics(id, &entry.channel, vec![tag_name.to_string()], &entry.cancel).await
    }

    /// Removes a single named tag from an already-live subscription. `name`
    /// goes through the same resolver as [`SubscriptionManager::add_topic`],
    /// so a non-identity resolver's naming scheme is honored symmetrically
    /// in both directions. Returns `Ok(false)` if the subscription was not
    /// subscribed to it.
    pub async fn remove_topic(&self, id: SubscriptionId, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("tag name must not be blank".to_string()));
        }
        let entry = { self.inner.subscriptions.read().get(&id).cloned() };
        let Some(entry) = entry else {
            return Err(Error::AlreadyDisposed);
        };

        let resolved = self
            .inner
            .resolver
            .resolve(&[name.to_string()], &entry.cancel)
            .await
            .map_err(Error::ResolverFailed)?;
        let Some(tag) = resolved.into_iter().next() else {
            return Ok(false);
        };

        if !entry.channel.remove_topic(&tag) {
            return Ok(false);
        }

        if self.inner.topic_index.remove(&tag, id) {
            self.apply_cache_eviction(&[tag.clone()]);
            self.notify_tags_removed(vec![tag]).await?;
        }
        Ok(true)
    }

    async fn add_topics(
        &self,
        id: SubscriptionId,
        channel: &Arc<SubscriptionChannel>,
        names: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let resolved = self
            .inner
            .resolver
            .resolve(&names, cancel)
            .await
            .map_err(Error::ResolverFailed)?;

        let mut transitioned = Vec::new();
        for tag in &resolved {
            if self.inner.topic_index.add(tag, id) {
                transitioned.push(tag.clone());
            }
            channel.add_topics(std::iter::once(tag.clone()));
            // Read-after-add: the index registration above has already
            // happened, so any live value for this tag from here on is
            // matched against this subscription. Publishing the cached
            // snapshot with `is_initial = true` queues it ahead of whatever
            // live traffic the channel has already buffered, closing the
            // ordering race without holding the index lock across an await.
            if let Some(cached) = self.inner.cache.get(&tag.id) {
                channel.publish(cached, true).await;
            }
        }

        for batch in transitioned.chunks(self.inner.config.subscribe_batch_size.max(1)) {
            self.notify_tags_added(batch.to_vec()).await?;
        }

        Ok(())
    }

    async fn notify_tags_added(&self, topics: Vec<TagIdentifier>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .inner
            .change_tx
            .send(ChangeEvent { topics, added: true, completion: tx })
            .is_err()
        {
            return Err(Error::Cancelled);
        }
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(Error::CallbackFailed(message)),
            Err(_) => Err(Error::Cancelled),
        }
    }

    async fn notify_tags_removed(&self, topics: Vec<TagIdentifier>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .inner
            .change_tx
            .send(ChangeEvent { topics, added: false, completion: tx })
            .is_err()
        {
            return Ok(());
        }
        if let Ok(Err(message)) = rx.await {
            tagflow_log::log_error!("on_tags_removed callback failed: {message}");
        }
        Ok(())
    }

    fn apply_cache_eviction(&self, removed_transitions: &[TagIdentifier]) {
        if self.inner.config.cache_policy == CachePolicy::EvictOnLastUnsubscribe {
            for tag in removed_transitions {
                self.inner.cache.remove(&tag.id);
            }
        }
    }

    fn spawn_coalescing_ticker(&self, channel: Arc<SubscriptionChannel>, interval: Duration, cancel: CancellationToken) {
        task::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => channel.flush_coalesced_batch(),
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    fn spawn_update_listener<U>(&self, id: SubscriptionId, mut updates: U, cancel: CancellationToken)
    where
        U: Stream<Item = SubscriptionUpdate> + Send + Unpin + 'static,
    {
        let manager = self.clone();
        task::spawn(async move {
            loop {
                let update = tokio::select! {
                    update = updates.next() => update,
                    _ = cancel.cancelled() => return,
                };
                let Some(update) = update else { return };
                let outcome = match update.action {
                    UpdateAction::Subscribe => manager.add_topic(id, &update.tag_name).await.map(|_| ()),
                    UpdateAction::Unsubscribe => manager.remove_topic(id, &update.tag_name).await.map(|_| ()),
                };
                if let Err(err) = outcome {
                    tagflow_log::log_warn!("subscription update for {} failed: {err}", update.tag_name);
                }
            }
        });
    }

    /// Delivers one freshly-observed value to the cache and every matching
    /// live subscriber. Returns `false` if the cache rejected it as stale or
    /// no subscription currently matches it.
    pub async fn value_received(&self, value: TagValueQueryResult) -> bool {
        let tag = value.tag_identifier();
        if !self.inner.cache.add_or_update(&tag, value.clone()) {
            return false;
        }

        let matches = if self.inner.hooks.uses_wildcard_match() {
            self.wildcard_matches(&tag)
        } else {
            self.inner.topic_index.subscribers(&tag.id)
        };

        if matches.is_empty() {
            return false;
        }

        // Snapshot the target channels and drop the lock before awaiting:
        // parking_lot guards are `!Send` (no `send_guard` feature enabled),
        // so holding one across `.await` would make this future `!Send` and
        // break every `task::spawn` that drives it.
        let targets: Vec<Arc<SubscriptionChannel>> = {
            let subscriptions = self.inner.subscriptions.read();
            matches.iter().filter_map(|id| subscriptions.get(id).map(|entry| entry.channel.clone())).collect()
        };
        for channel in &targets {
            channel.publish(value.clone(), false).await;
        }
        true
    }

    fn wildcard_matches(&self, incoming: &TagIdentifier) -> Vec<SubscriptionId> {
        let hooks = &self.inner.hooks;
        self.inner
            .subscriptions
            .read()
            .values()
            .filter(|entry| entry.channel.topics_snapshot().iter().any(|topic| hooks.is_topic_match(topic, incoming)))
            .map(|entry| entry.id)
            .collect()
    }

    /// Point-in-time health snapshot.
    pub fn health(&self) -> crate::health::HealthStatus {
        crate::health::HealthStatus {
            subscriber_count: self.subscription_count(),
            subscribed_tag_count: self.inner.topic_index.tag_count(),
            cache_size: self.inner.cache.len(),
            polling_active: false,
        }
    }

    /// Idempotently tears down one subscription: cancels its tasks, drains
    /// and closes its channel, removes it from the topic index, and fires
    /// (without awaiting) the last-subscriber callback for any tag that just
    /// lost its last subscriber. Mirrors the teacher's `ActiveSubscription`
    /// cleaning itself up from its own `Drop` impl.
    pub fn dispose(&self, id: SubscriptionId) {
        let entry = { self.inner.subscriptions.write().remove(&id) };
        let Some(entry) = entry else {
            return; // already disposed, or never existed
        };

        entry.cancel.cancel();
        entry.channel.complete();
        self.inner.active_count.fetch_sub(1, Ordering::Relaxed);

        let mut removed_transitions = Vec::new();
        for topic in entry.channel.topics_snapshot() {
            if self.inner.topic_index.remove(&topic, id) {
                removed_transitions.push(topic);
            }
        }

        if removed_transitions.is_empty() {
            return;
        }

        self.apply_cache_eviction(&removed_transitions);

        for batch in removed_transitions.chunks(self.inner.config.subscribe_batch_size.max(1)) {
            let (tx, _rx) = oneshot::channel();
            let _ = self.inner.change_tx.send(ChangeEvent {
                topics: batch.to_vec(),
                added: false,
                completion: tx,
            });
        }
    }

    /// Cancels every live subscription and stops the callback consumer task.
    /// Subsequent `subscribe` calls return `AlreadyDisposed`.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown_token.cancel();
        let ids: Vec<_> = self.inner.subscriptions.read().keys().copied().collect();
        for id in ids {
            self.dispose(id);
        }
        drop(self.inner.change_tx.clone()); // one extra sender keeps the task alive until this drops too
        if let Some(handle) = self.inner.change_task.lock().take() {
            handle.abort();
        }
    }
}

async fn run_change_consumer(mut rx: mpsc::UnboundedReceiver<ChangeEvent>, hooks: Arc<dyn SubscriptionHooks>) {
    while let Some(event) = rx.recv().await {
        let result = if event.added {
            hooks.on_tags_added(&event.topics).await
        } else {
            hooks.on_tags_removed(&event.topics).await
        };
        if let Err(ref message) = result {
            tagflow_log::log_error!("subscription transition callback failed: {message}");
        }
        let _ = event.completion.send(result);
    }
}

/// A live subscription. Disposes itself (cancelling its tasks, closing its
/// channel, and releasing its topic references) when dropped — the same
/// `Drop`-driven cleanup the teacher's `ActiveSubscription` uses.
pub struct SubscriptionHandle<Ctx> {
    id: SubscriptionId,
    manager: SubscriptionManager<Ctx>,
    channel: Arc<SubscriptionChannel>,
}

impl<Ctx> SubscriptionHandle<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    /// This subscription's id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Pops the next delivered value, waiting until one arrives or the
    /// subscription ends. `None` means the subscription is disposed and
    /// fully drained.
    pub async fn recv(&self) -> Option<TagValueQueryResult> {
        self.channel.recv().await
    }

    /// Adds a topic to this subscription dynamically.
    pub async fn add_topic(&self, tag_name: &str) -> Result<()> {
        self.manager.add_topic(self.id, tag_name).await
    }

    /// Removes a topic from this subscription dynamically.
    pub async fn remove_topic(&self, tag_id: &str) -> Result<bool> {
        self.manager.remove_topic(self.id, tag_id).await
    }

    /// The tags this subscription currently names.
    pub fn topics(&self) -> Vec<TagIdentifier> {
        self.channel.topics_snapshot()
    }
}

impl<Ctx> SubscriptionHandle<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    /// The caller-supplied context this subscription was created with, if
    /// the subscription is still live.
    pub fn context(&self) -> Option<Ctx> {
        self.manager.inner.subscriptions.read().get(&self.id).map(|entry| entry.context.clone())
    }
}

impl<Ctx> Drop for SubscriptionHandle<Ctx> {
    fn drop(&mut self) {
        self.manager.dispose(self.id);
    }
}

impl<Ctx> std::fmt::Debug for SubscriptionHandle<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}
