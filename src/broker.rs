//! The broker façade: wires the hot store, warm store, and clocks into the
//! components in §2 and exposes the operations a caller actually uses.
//! Construction (connection establishment, credential handling, cluster
//! discovery) is out of scope (spec §1); callers hand in already-connected
//! `HotStore`/`WarmStore` implementations.

use std::sync::Arc;

use serde_json::Value;

use crate::clock::WallClock;
use crate::config::BrokerConfig;
use crate::consumer::ConsumerLoop;
use crate::dead_letter::DeadLetterSink;
use crate::error::BrokerError;
use crate::hotstore::HotStore;
use crate::keyname::KeyNamer;
use crate::producer::{Producer, PublishOptions};
use crate::retry_scheduler::RetryScheduler;
use crate::shared_memory::SharedMemoryEngine;
use crate::topic_manager::{SubscriptionConfig, TopicManager, TopicStats};
use crate::warmstore::WarmStore;

pub struct Broker {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    names: KeyNamer,
    producer: Producer,
    topic_manager: TopicManager,
    dead_letter: DeadLetterSink,
    clock: Arc<dyn WallClock>,
}

impl Broker {
    pub fn new(hot: Arc<dyn HotStore>, warm: Arc<dyn WarmStore>, clock: Arc<dyn WallClock>, config: &BrokerConfig) -> Self {
        let names = KeyNamer::new(config.key_prefix.clone(), config.tenant.clone(), config.namespace.clone());
        let producer = Producer::new(
            hot.clone(),
            warm.clone(),
            clock.clone(),
            names.clone(),
            config.tenant.clone(),
            config.max_payload_bytes,
            config.max_stream_len,
        );
        let topic_manager = TopicManager::new(hot.clone(), warm.clone(), clock.clone(), names.clone(), config.tenant.clone());
        let dead_letter = DeadLetterSink::new(
            hot.clone(),
            warm.clone(),
            clock.clone(),
            names.clone(),
            config.tenant.clone(),
            config.max_stream_len,
        );
        Self { hot, warm, names, producer, topic_manager, dead_letter, clock }
    }

    pub async fn publish(&self, topic: &str, payload: &Value, opts: &PublishOptions) -> Result<String, BrokerError> {
        self.producer.publish(topic, payload, opts).await
    }

    pub async fn publish_batch(&self, topic: &str, payloads: &[Value], opts: &PublishOptions) -> Result<Vec<String>, BrokerError> {
        self.producer.publish_batch(topic, payloads, opts).await
    }

    pub async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.topic_manager.ensure_topic(topic).await
    }

    pub async fn ensure_subscription(&self, topic: &str, subscription: &str, config: SubscriptionConfig) -> Result<(), BrokerError> {
        self.topic_manager.ensure_subscription(topic, subscription, config).await
    }

    pub async fn delete_subscription(&self, topic: &str, subscription: &str) -> Result<(), BrokerError> {
        self.topic_manager.delete_subscription(topic, subscription).await
    }

    pub async fn purge_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.topic_manager.purge_topic(topic).await
    }

    pub async fn stats(&self, topic: &str) -> Result<TopicStats, BrokerError> {
        self.topic_manager.get_stats(topic).await
    }

    pub async fn dlq_length(&self, topic: &str) -> Result<u64, BrokerError> {
        self.dead_letter.dlq_length(topic).await
    }

    pub async fn peek_dlq(&self, topic: &str, limit: u64) -> Result<Vec<crate::dead_letter::DeadLetterEntry>, BrokerError> {
        self.dead_letter.peek_dlq(topic, limit).await
    }

    pub async fn purge_dlq(&self, topic: &str) -> Result<(), BrokerError> {
        self.dead_letter.purge_dlq(topic).await
    }

    /// Start a consumer loop for `(topic, subscription)`. Fails with
    /// `SubscriptionNotFound` if `ensure_subscription` was never called.
    pub async fn consume(&self, topic: &str, subscription: &str, consumer_id: Option<String>) -> Result<ConsumerLoop, BrokerError> {
        let retry_scheduler = RetryScheduler::new(self.hot.clone(), self.clock.clone(), self.names.clone());
        let dead_letter = DeadLetterSink::new(
            self.hot.clone(),
            self.warm.clone(),
            self.clock.clone(),
            self.names.clone(),
            "broker",
            100_000,
        );
        ConsumerLoop::start(
            self.hot.clone(),
            retry_scheduler,
            dead_letter,
            self.clock.clone(),
            self.names.clone(),
            &self.topic_manager,
            topic,
            subscription,
            consumer_id,
        )
        .await
    }

    pub fn shared_memory(&self, tenant: impl Into<String>, namespace: impl Into<String>) -> SharedMemoryEngine {
        SharedMemoryEngine::new(self.hot.clone(), self.warm.clone(), self.clock.clone(), self.names.clone(), tenant, namespace)
    }

    /// Graceful shutdown (spec §5): close the warm store, then disconnect
    /// the hot store. In-flight messages remain in-flight in the hot store
    /// and will be reclaimed by a future consumer after their visibility
    /// timeout.
    pub async fn close(self) -> Result<(), BrokerError> {
        self.warm.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenWallClock;
    use crate::config::HotStoreBackend;
    use crate::testkit::{InMemoryHotStore, InMemoryWarmStore};

    fn broker() -> Broker {
        let clock = Arc::new(FrozenWallClock::at(0));
        let hot: Arc<dyn HotStore> = Arc::new(InMemoryHotStore::new(clock.clone()));
        let warm: Arc<dyn WarmStore> = Arc::new(InMemoryWarmStore::new());
        let config = BrokerConfig::new(HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost".into() }, "mongodb://localhost");
        Broker::new(hot, warm, clock, &config)
    }

    fn sub_config() -> SubscriptionConfig {
        SubscriptionConfig {
            visibility_timeout_ms: 1000,
            max_deliveries: 3,
            retry_backoff_ms: vec![100, 200, 400],
            dead_letter_enabled: true,
            shard_count: 1,
            block_ms: 1000,
            count_per_read: 10,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn end_to_end_publish_ack() {
        let broker = broker();
        broker.ensure_subscription("orders", "fraud", sub_config()).await.unwrap();
        broker.publish("orders", &serde_json::json!({"id": "A"}), &PublishOptions::default()).await.unwrap();

        let consumer = broker.consume("orders", "fraud", None).await.unwrap();
        let messages = consumer.poll().await.unwrap();
        assert_eq!(messages.len(), 1);
        messages[0].ack().await.unwrap();

        let stats = broker.stats("orders").await.unwrap();
        assert_eq!(stats.length, 1);
        assert_eq!(broker.dlq_length("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversize_publish_leaves_stats_unchanged() {
        let broker = broker();
        broker.ensure_topic("orders").await.unwrap();
        let err = broker
            .publish("orders", &serde_json::json!({"blob": "x".repeat(2000)}), &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PayloadTooLarge { .. }));
        assert_eq!(broker.stats("orders").await.unwrap().length, 0);
    }

    #[tokio::test]
    async fn close_shuts_down_without_error() {
        let broker = broker();
        broker.close().await.unwrap();
    }
}
