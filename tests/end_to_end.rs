//! End-to-end scenarios against an in-memory broker (publish-ack,
//! retry-then-succeed, dead-letter on max deliveries, reclaim after
//! visibility timeout, oversize publish, KV TTL + warm fallback).

use std::sync::Arc;

use chronow_core::testkit::{InMemoryHotStore, InMemoryWarmStore};
use chronow_core::{
    Broker, BrokerConfig, BrokerError, FrozenWallClock, HotStore, HotStoreBackend, NackOptions, PublishOptions,
    SetOptions, SubscriptionConfig, WallClock, WarmStore,
};

fn broker_with_clock() -> (Broker, Arc<FrozenWallClock>) {
    let clock = Arc::new(FrozenWallClock::at(1_700_000_000_000));
    let wall_clock: Arc<dyn WallClock> = clock.clone();
    let hot: Arc<dyn HotStore> = Arc::new(InMemoryHotStore::new(wall_clock.clone()));
    let warm: Arc<dyn WarmStore> = Arc::new(InMemoryWarmStore::new());
    let config = BrokerConfig::new(HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost".into() }, "mongodb://localhost");
    (Broker::new(hot, warm, wall_clock, &config), clock)
}

fn sensible() -> SubscriptionConfig {
    SubscriptionConfig {
        visibility_timeout_ms: 1_000,
        max_deliveries: 3,
        retry_backoff_ms: vec![100, 200, 400],
        dead_letter_enabled: true,
        shard_count: 1,
        block_ms: 1_000,
        count_per_read: 10,
        created_at: String::new(),
    }
}

#[tokio::test]
async fn scenario_publish_and_ack() {
    let (broker, _clock) = broker_with_clock();
    broker.ensure_subscription("orders", "fraud", sensible()).await.unwrap();
    broker.publish("orders", &serde_json::json!({"id": "A"}), &PublishOptions::default()).await.unwrap();

    let consumer = broker.consume("orders", "fraud", None).await.unwrap();
    let messages = consumer.poll().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].redelivery_count, 0);
    messages[0].ack().await.unwrap();

    assert_eq!(broker.stats("orders").await.unwrap().length, 1);
    assert_eq!(broker.dlq_length("orders").await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_retry_then_succeed() {
    let (broker, clock) = broker_with_clock();
    broker.ensure_subscription("orders", "fraud", sensible()).await.unwrap();
    let original_id = broker.publish("orders", &serde_json::json!({"id": "B"}), &PublishOptions::default()).await.unwrap();

    let consumer = broker.consume("orders", "fraud", None).await.unwrap();
    let first = consumer.poll().await.unwrap();
    assert_eq!(first[0].redelivery_count, 0);
    first[0].nack(NackOptions { requeue: true, delay_ms: None }).await.unwrap();

    assert!(consumer.poll().await.unwrap().is_empty());

    clock.advance(130);
    let retried = consumer.poll().await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].headers.get("retryOf"), Some(&original_id));
    retried[0].ack().await.unwrap();

    assert_eq!(broker.dlq_length("orders").await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_dead_letter_on_max_deliveries() {
    let (broker, clock) = broker_with_clock();
    broker.ensure_subscription("orders", "fraud", sensible()).await.unwrap();
    let original_id = broker.publish("orders", &serde_json::json!({"id": "C"}), &PublishOptions::default()).await.unwrap();

    let consumer = broker.consume("orders", "fraud", None).await.unwrap();
    for expected in 0..3u32 {
        let messages = consumer.poll().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].redelivery_count, expected);
        messages[0].nack(NackOptions { requeue: true, delay_ms: None }).await.unwrap();
        clock.advance(500);
    }

    assert_eq!(broker.dlq_length("orders").await.unwrap(), 1);
    let entries = broker.peek_dlq("orders", 10).await.unwrap();
    assert_eq!(entries[0].original_msg_id, original_id);
    assert_eq!(entries[0].reason, "Max deliveries exceeded");
}

#[tokio::test]
async fn scenario_reclaim_after_visibility_timeout() {
    let (broker, clock) = broker_with_clock();
    broker.ensure_subscription("orders", "fraud", sensible()).await.unwrap();
    broker.publish("orders", &serde_json::json!({"id": "D"}), &PublishOptions::default()).await.unwrap();

    let dying = broker.consume("orders", "fraud", Some("consumer-1".to_string())).await.unwrap();
    let first = dying.poll().await.unwrap();
    assert_eq!(first.len(), 1);

    clock.advance(1_500);
    let replacement = broker.consume("orders", "fraud", Some("consumer-2".to_string())).await.unwrap();
    let reclaimed = replacement.poll().await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, first[0].id);
}

#[tokio::test]
async fn scenario_oversize_publish_is_rejected() {
    let clock = Arc::new(FrozenWallClock::at(0));
    let wall_clock: Arc<dyn WallClock> = clock.clone();
    let hot: Arc<dyn HotStore> = Arc::new(InMemoryHotStore::new(wall_clock.clone()));
    let warm: Arc<dyn WarmStore> = Arc::new(InMemoryWarmStore::new());
    let mut config = BrokerConfig::new(HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost".into() }, "mongodb://localhost");
    config.max_payload_bytes = 1024;
    let broker = Broker::new(hot, warm, wall_clock, &config);
    broker.ensure_topic("orders").await.unwrap();

    let err = broker
        .publish("orders", &serde_json::json!({"blob": "x".repeat(2000)}), &PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PayloadTooLarge { .. }));
    assert_eq!(broker.stats("orders").await.unwrap().length, 0);
}

#[tokio::test]
async fn scenario_kv_ttl_then_warm_fallback() {
    let (broker, clock) = broker_with_clock();
    let shared_memory = broker.shared_memory("t1", "ns");
    let value = serde_json::json!({"v": 1});
    let opts = SetOptions { hot_ttl_sec: Some(1), warm_persist: true, ..Default::default() };
    shared_memory.set("k", &value, &opts).await.unwrap();

    assert_eq!(shared_memory.get("k").await.unwrap(), Some(value.clone()));
    clock.advance(2_000);
    assert_eq!(shared_memory.get("k").await.unwrap(), Some(value));
}
