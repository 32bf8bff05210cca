//! Push hub (C6): the public composition root.
//!
//! Grounded on `cdk::mint::subscription::PubSubManager`, which wraps the
//! generic `Pubsub<MintPubSubSpec>` behind a `Deref` and adds a handful of
//! domain-shaped convenience methods on top. Here the wrapped engine is
//! [`SubscriptionManager`] and the convenience added is persistence: an
//! optional [`KvSnapshotStore`] the hub writes through on every accepted
//! value and primes its cache from on startup, kept entirely out of the
//! manager itself so the manager stays a pure in-memory engine.

use std::ops::Deref;
use std::sync::Arc;

use crate::config::HubConfig;
use crate::error::Result;
use crate::kvstore::{KvSnapshotStore, KvSnapshotStoreExt, TAGS_KEY};
use crate::manager::{NoopHooks, SubscriptionHooks, SubscriptionManager};
use crate::resolver::{IdentityResolver, TagResolver};
use crate::value::{TagIdentifier, TagValueQueryResult};

/// The push hub: a [`SubscriptionManager`] plus an optional durable
/// snapshot-store collaborator used purely as a write-through cache warmer,
/// never as the system of record for the live stream (§ Non-goals).
pub struct PushHub<Ctx = ()> {
    manager: SubscriptionManager<Ctx>,
    store: Option<Arc<dyn KvSnapshotStore>>,
}

impl<Ctx> Clone for PushHub<Ctx> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            store: self.store.clone(),
        }
    }
}

impl<Ctx> std::fmt::Debug for PushHub<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHub")
            .field("manager", &self.manager)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Builds a [`PushHub`] with defaulted collaborators, overriding only what
/// the caller supplies. Mirrors the teacher's preference for an explicit
/// builder over a sprawling constructor argument list once a type grows more
/// than two or three optional collaborators.
pub struct PushHubBuilder<Ctx = ()> {
    config: HubConfig,
    resolver: Arc<dyn TagResolver>,
    hooks: Arc<dyn SubscriptionHooks>,
    store: Option<Arc<dyn KvSnapshotStore>>,
    _ctx: std::marker::PhantomData<Ctx>,
}

impl<Ctx> Default for PushHubBuilder<Ctx> {
    fn default() -> Self {
        Self {
            config: HubConfig::default(),
            resolver: Arc::new(IdentityResolver),
            hooks: Arc::new(NoopHooks),
            store: None,
            _ctx: std::marker::PhantomData,
        }
    }
}

impl<Ctx> PushHubBuilder<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    /// Starts a new builder with spec-default configuration, an identity
    /// resolver, and no-op hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the hub configuration.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the tag resolver.
    pub fn resolver(mut self, resolver: Arc<dyn TagResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Overrides the subscription hooks (first/last-subscriber callbacks and
    /// topic-matching rule).
    pub fn hooks(mut self, hooks: Arc<dyn SubscriptionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attaches an optional durable snapshot store.
    pub fn store(mut self, store: Arc<dyn KvSnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the hub. Does not prime the cache from the store; call
    /// [`PushHub::prime_from_store`] afterward if that's wanted.
    pub fn build(self) -> PushHub<Ctx> {
        let cache = Arc::new(crate::cache::SnapshotCache::new());
        PushHub {
            manager: SubscriptionManager::new(self.config, self.resolver, self.hooks, cache),
            store: self.store,
        }
    }
}

impl<Ctx> PushHub<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    /// Delivers one freshly-observed value: updates the snapshot cache,
    /// fans it out to every matching live subscriber, and — if a store is
    /// attached — writes it through for the next process's cold start.
    /// The write-through is fire-and-forget: a store failure is logged but
    /// never fails delivery to live subscribers (§ Non-goals: the live
    /// stream is not durably persisted; this is a best-effort cache warmer).
    pub async fn value_received(&self, value: TagValueQueryResult) -> bool {
        let accepted = self.manager.value_received(value.clone()).await;
        if accepted {
            if let Some(store) = &self.store {
                if let Err(err) = store.write_snapshot(&value).await {
                    tagflow_log::log_warn!("snapshot store write-through failed for {}: {err}", value.tag_id);
                }
            }
        }
        accepted
    }

    /// Loads the set of known tag ids and their last-persisted values from
    /// the attached store (if any) into the cache, so the first subscriber
    /// after a restart does not have to wait for fresh live traffic to see a
    /// value. A no-op if no store is attached.
    pub async fn prime_from_store(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(tag_ids) = store.read_json::<Vec<String>>(TAGS_KEY).await? else {
            return Ok(());
        };
        for tag_id in tag_ids {
            if let Some(snapshot) = store.read_snapshot(&tag_id).await? {
                let tag = TagIdentifier::new(tag_id, snapshot.tag_name.clone());
                self.manager.cache().add_or_update(&tag, snapshot);
            }
        }
        Ok(())
    }

    /// Persists the current set of known tag ids to the store, so a future
    /// restart's [`PushHub::prime_from_store`] knows what to read back. Call
    /// this whenever the subscribed-tag set changes if durability of the
    /// tag catalog (not the values) matters to the embedding adapter.
    pub async fn persist_known_tags(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let ids: Vec<String> = self.manager.subscribed_tags().into_iter().map(|tag| tag.id).collect();
        store.write_json(TAGS_KEY, &ids).await
    }

    /// The underlying subscription manager, for collaborators (the polling
    /// driver) that need direct access beyond what this wrapper exposes.
    pub fn manager(&self) -> &SubscriptionManager<Ctx> {
        &self.manager
    }
}

impl<Ctx> Deref for PushHub<Ctx> {
    type Target = SubscriptionManager<Ctx>;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}
