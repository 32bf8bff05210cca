//! Crate-level integration tests for the six concrete scenarios and the
//! cross-cutting invariants, exercised against the public
//! `SubscriptionManager` / `PushHub` surface since they cross cache, channel
//! and manager internals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tagflow_core::manager::{SubscriptionHooks, SubscriptionUpdate};
use tagflow_core::poller::PollableSource;
use tagflow_core::{
    Error, HubConfig, IdentityResolver, NoopHooks, PollingDriver, PushHub, PushHubBuilder, SubscriptionManager,
    TagIdentifier, TagValueBuilder, TagValueQueryResult, Variant,
};

fn value_at(tag_id: &str, secs: i64) -> TagValueQueryResult {
    let tag = TagIdentifier::new(tag_id, tag_id);
    TagValueQueryResult::new(
        &tag,
        TagValueBuilder::new()
            .value(Variant::Numeric(secs as f64))
            .sample_time(Utc.timestamp_opt(secs, 0).unwrap())
            .build(),
    )
}

fn hub() -> PushHub<()> {
    PushHubBuilder::new().build()
}

/// Scenario 1: two producers race to write (A, t=10) and (A, t=5). Whichever
/// order they land in, the subscriber observes exactly one value (t=10) and
/// the cache holds t=10 — the monotonic-time gate is the ordering oracle.
#[tokio::test]
async fn scenario_1_racing_producers_converge_on_the_newer_sample() {
    let hub = hub();
    let handle = hub
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into()], Duration::ZERO, None)
        .await
        .unwrap();

    let newer = hub.value_received(value_at("A", 10)).await;
    let older = hub.value_received(value_at("A", 5)).await;
    assert!(newer);
    assert!(!older);

    let delivered = handle.recv().await.unwrap();
    assert_eq!(delivered.value.utc_sample_time.timestamp(), 10);
    assert_eq!(hub.manager().cache().get("A").unwrap().value.utc_sample_time.timestamp(), 10);
}

/// Scenario 2: S1 subscribes {A,B}, S2 subscribes {B,C}; a producer emits
/// A, B, C in order. S1 sees A then B; S2 sees B then C.
#[tokio::test]
async fn scenario_2_overlapping_subscribers_each_see_their_own_topics_in_order() {
    let hub = hub();
    let s1 = hub
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into(), "B".into()], Duration::ZERO, None)
        .await
        .unwrap();
    let s2 = hub
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["B".into(), "C".into()], Duration::ZERO, None)
        .await
        .unwrap();

    hub.value_received(value_at("A", 1)).await;
    hub.value_received(value_at("B", 2)).await;
    hub.value_received(value_at("C", 3)).await;

    assert_eq!(s1.recv().await.unwrap().tag_id, "A");
    assert_eq!(s1.recv().await.unwrap().tag_id, "B");

    assert_eq!(s2.recv().await.unwrap().tag_id, "B");
    assert_eq!(s2.recv().await.unwrap().tag_id, "C");
}

/// Scenario 3: a subscriber with `publish_interval = 100ms` receives 500
/// samples for tag A within 50ms, all with increasing sample times. Exactly
/// one value is emitted at the next period boundary, equal to the last
/// input.
#[tokio::test(start_paused = true)]
async fn scenario_3_high_rate_updates_coalesce_to_one_per_period() {
    let manager = SubscriptionManager::<()>::new(
        HubConfig::default(),
        Arc::new(IdentityResolver),
        Arc::new(NoopHooks),
        Arc::new(tagflow_core::SnapshotCache::new()),
    );
    let handle = manager
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into()], Duration::from_millis(100), None)
        .await
        .unwrap();

    // Let the coalescing ticker's immediate first tick (an empty flush,
    // since nothing has been published yet) run and settle.
    tokio::task::yield_now().await;

    for i in 1..=500i64 {
        manager.value_received(value_at("A", i)).await;
        tokio::time::advance(Duration::from_micros(100)).await; // 500 * 100us = 50ms total
    }

    // Cross the 100ms period boundary so the ticker flushes the batch.
    tokio::time::advance(Duration::from_millis(60)).await;

    let received = handle.recv().await.unwrap();
    assert_eq!(received.value.utc_sample_time.timestamp(), 500);
}

/// Scenario 4: a polling driver over a poll-only upstream feeds strictly
/// increasing samples into subscribers; a stale out-of-band value is still
/// rejected by the monotonic-time gate.
#[tokio::test]
async fn scenario_4_polling_driver_feeds_strictly_increasing_samples_into_subscribers() {
    let hub = hub();
    let handle = hub
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into()], Duration::ZERO, None)
        .await
        .unwrap();

    struct CountingSource {
        counter: AtomicUsize,
    }

    #[async_trait]
    impl PollableSource for CountingSource {
        async fn read_snapshot_tag_values(&self, tags: &[TagIdentifier]) -> Result<Vec<TagValueQueryResult>, String> {
            let t = self.counter.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            Ok(tags.iter().map(|tag| value_at(&tag.id, t)).collect())
        }
    }

    let tag = TagIdentifier::new("A", "A");
    let source = Arc::new(CountingSource { counter: AtomicUsize::new(0) });
    let driver = PollingDriver::new(hub.clone(), source);

    driver.poll_now(std::slice::from_ref(&tag)).await;
    driver.poll_now(std::slice::from_ref(&tag)).await;
    driver.poll_now(std::slice::from_ref(&tag)).await;

    let first = handle.recv().await.unwrap();
    let second = handle.recv().await.unwrap();
    let third = handle.recv().await.unwrap();
    assert!(second.value.utc_sample_time > first.value.utc_sample_time);
    assert!(third.value.utc_sample_time > second.value.utc_sample_time);

    assert!(!hub.value_received(value_at("A", 1)).await); // stale, rejected by C2
}

struct FlakyHooks {
    calls: AtomicUsize,
}

#[async_trait]
impl SubscriptionHooks for FlakyHooks {
    async fn on_tags_added(&self, _tags: &[TagIdentifier]) -> Result<(), String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("backend unavailable".to_string())
        } else {
            Ok(())
        }
    }
}

/// Scenario 5: a first-subscriber callback fails on tag X. The subscribe
/// call surfaces `CallbackFailed` and the subscription is torn down. Per the
/// documented decision (no special-cased rollback — see DESIGN.md), the next
/// subscribe to X starts from a clean 0→1 transition and re-triggers the
/// callback, which this time succeeds.
#[tokio::test]
async fn scenario_5_failing_first_subscriber_callback_fails_subscribe_then_recovers() {
    let hooks = Arc::new(FlakyHooks { calls: AtomicUsize::new(0) });
    let manager = SubscriptionManager::<()>::new(
        HubConfig::default(),
        Arc::new(IdentityResolver),
        hooks.clone(),
        Arc::new(tagflow_core::SnapshotCache::new()),
    );

    let first_attempt = manager
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["X".into()], Duration::ZERO, None)
        .await;
    assert!(matches!(first_attempt, Err(Error::CallbackFailed(_))));
    assert_eq!(manager.topic_index().refcount("X"), 0);

    let second_attempt = manager
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["X".into()], Duration::ZERO, None)
        .await;
    assert!(second_attempt.is_ok());
    assert_eq!(hooks.calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.topic_index().refcount("X"), 1);
}

/// Scenario 6: 1,000 (here: 200, to keep the suite fast) subscribers with a
/// producer emitting concurrently; shutting the hub down returns within a
/// bounded time, no subscriber observes a panic, and every channel ends up
/// closed and drained.
#[tokio::test]
async fn scenario_6_dispose_during_active_fanout_completes_promptly() {
    let hub = hub();
    let mut handles = Vec::new();
    for _ in 0..200 {
        let handle = hub
            .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into()], Duration::ZERO, None)
            .await
            .unwrap();
        handles.push(handle);
    }

    let producer_hub = hub.clone();
    let cancel = hub.shutdown_token();
    let producer = tokio::spawn(async move {
        let mut t = 0i64;
        while !cancel.is_cancelled() {
            t += 1;
            producer_hub.value_received(value_at("A", t)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(20)).await; // let fan-out run for a bit
    tokio::time::timeout(Duration::from_secs(2), hub.shutdown())
        .await
        .expect("shutdown completes promptly even under active fan-out");

    producer.await.unwrap();

    for handle in &handles {
        while handle.recv().await.is_some() {}
    }
}

/// Idempotence: disposing a subscription twice is a no-op, and unsubscribing
/// from a tag the subscription never had returns `false` without side
/// effects.
#[tokio::test]
async fn disposing_twice_and_unsubscribing_an_unknown_tag_are_both_no_ops() {
    let hub = hub();
    let handle = hub
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec!["A".into()], Duration::ZERO, None)
        .await
        .unwrap();
    let id = handle.id();

    hub.manager().dispose(id);
    hub.manager().dispose(id); // idempotent
    assert_eq!(hub.subscription_count(), 0);

    let other = hub
        .subscribe::<tokio_stream::Empty<SubscriptionUpdate>>((), vec![], Duration::ZERO, None)
        .await
        .unwrap();
    assert!(!other.remove_topic("never-subscribed").await.unwrap());
}

/// Round-trip: a tag value written through the JSON converter set and
/// reloaded is byte-identical (field-for-field equal).
#[test]
fn kv_round_trip_is_exact_under_the_json_converter_set() {
    let snapshot = value_at("A", 42);
    let json = serde_json::to_string(&snapshot).expect("serializable");
    let restored: TagValueQueryResult = serde_json::from_str(&json).expect("deserializable");
    assert_eq!(snapshot, restored);
}
