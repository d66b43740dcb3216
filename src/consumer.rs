//! Consumer Loop (C12): group read, reclaim, retry drain, delivery-count
//! tracking, and the per-message ack/nack/dead-letter state machine
//! (spec §4.10).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::backoff::Backoff;
use crate::clock::WallClock;
use crate::codec::{decode_headers, decode_payload};
use crate::dead_letter::{DeadLetterSink, MANUAL_DEAD_LETTER, MAX_DELIVERIES_EXCEEDED};
use crate::error::BrokerError;
use crate::hotstore::{Fields, HotStore};
use crate::keyname::KeyNamer;
use crate::retry_scheduler::RetryScheduler;
use crate::topic_manager::{SubscriptionConfig, TopicManager};

/// Options to `Message::nack`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NackOptions {
    pub requeue: bool,
    pub delay_ms: Option<u64>,
}

/// A single delivered entry. `ack`/`nack`/`dead_letter` are each callable at
/// most once; a second call is a no-op rather than a panic, matching the
/// spec's "extra calls are no-ops" ownership rule (§3.3).
pub struct Message {
    pub id: String,
    pub topic: String,
    pub subscription: String,
    pub headers: HashMap<String, String>,
    pub payload: Value,
    pub redelivery_count: u32,
    settled: AtomicBool,
    loop_handle: Arc<ConsumerLoopInner>,
}

impl Message {
    fn mark_settled(&self) -> bool {
        self.settled.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    #[instrument(skip(self), fields(id = %self.id, topic = %self.topic, subscription = %self.subscription))]
    pub async fn ack(&self) -> Result<(), BrokerError> {
        if !self.mark_settled() {
            return Ok(());
        }
        self.loop_handle.ack_entry(&self.id).await
    }

    #[instrument(skip(self, opts), fields(id = %self.id, topic = %self.topic, subscription = %self.subscription))]
    pub async fn nack(&self, opts: NackOptions) -> Result<(), BrokerError> {
        if !self.mark_settled() {
            return Ok(());
        }
        self.loop_handle.nack_entry(self, opts).await
    }

    #[instrument(skip(self), fields(id = %self.id, topic = %self.topic, subscription = %self.subscription))]
    pub async fn dead_letter(&self, reason: Option<&str>) -> Result<(), BrokerError> {
        if !self.mark_settled() {
            return Ok(());
        }
        self.loop_handle.dead_letter_entry(self, reason.unwrap_or(MANUAL_DEAD_LETTER)).await
    }
}

struct ConsumerLoopInner {
    hot: Arc<dyn HotStore>,
    retry_scheduler: RetryScheduler,
    dead_letter: DeadLetterSink,
    clock: Arc<dyn WallClock>,
    names: KeyNamer,
    topic: String,
    subscription: String,
    consumer_id: String,
    config: SubscriptionConfig,
    delivery_counts: std::sync::Mutex<HashMap<String, u32>>,
}

impl ConsumerLoopInner {
    fn log(&self) -> String {
        self.names.topic_log(&self.topic)
    }

    fn group(&self) -> String {
        KeyNamer::group_name(&self.subscription)
    }

    async fn ack_entry(&self, id: &str) -> Result<(), BrokerError> {
        self.hot.group_ack(&self.log(), &self.group(), &[id.to_string()]).await?;
        self.delivery_counts.lock().unwrap().remove(id);
        Ok(())
    }

    async fn nack_entry(&self, message: &Message, opts: NackOptions) -> Result<(), BrokerError> {
        let d = {
            let counts = self.delivery_counts.lock().unwrap();
            *counts.get(&message.id).unwrap_or(&1)
        };

        if d >= self.config.max_deliveries {
            self.dead_letter
                .send_to_dead_letter(
                    &self.topic,
                    &message.id,
                    &serde_json::to_string(&message.payload).unwrap_or_default(),
                    &serde_json::to_string(&message.headers).unwrap_or_default(),
                    MAX_DELIVERIES_EXCEEDED,
                    d as u64,
                )
                .await?;
            self.ack_entry(&message.id).await?;
            return Ok(());
        }

        if opts.requeue {
            let backoff = Backoff::sequence(self.config.retry_backoff_durations());
            let delay_override = opts.delay_ms.map(Duration::from_millis);
            self.retry_scheduler
                .schedule_retry(
                    &self.topic,
                    &self.subscription,
                    &message.id,
                    &serde_json::to_string(&message.payload).unwrap_or_default(),
                    message.headers.clone(),
                    d,
                    &backoff,
                    delay_override,
                )
                .await?;
            self.ack_entry(&message.id).await?;
        }
        // Otherwise: leave the entry in flight; it is reclaimed after the
        // visibility timeout expires.
        Ok(())
    }

    async fn dead_letter_entry(&self, message: &Message, reason: &str) -> Result<(), BrokerError> {
        let d = {
            let counts = self.delivery_counts.lock().unwrap();
            *counts.get(&message.id).unwrap_or(&1)
        };
        self.dead_letter
            .send_to_dead_letter(
                &self.topic,
                &message.id,
                &serde_json::to_string(&message.payload).unwrap_or_default(),
                &serde_json::to_string(&message.headers).unwrap_or_default(),
                reason,
                d as u64,
            )
            .await?;
        self.ack_entry(&message.id).await
    }
}

/// Drives one `(topic, subscription, consumer_id)` loop. Each call to
/// `poll` runs one iteration of drain -> reclaim -> read -> dispatch and
/// returns the batch of `Message` handles read in that iteration (possibly
/// empty), matching the "explicit poll function" shape from the design notes
/// (§9) rather than forcing a long-running task on every caller.
pub struct ConsumerLoop {
    inner: Arc<ConsumerLoopInner>,
}

impl std::fmt::Debug for ConsumerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("topic", &self.inner.topic)
            .field("subscription", &self.inner.subscription)
            .field("consumer_id", &self.inner.consumer_id)
            .finish()
    }
}

impl ConsumerLoop {
    #[instrument(skip(hot, retry_scheduler, dead_letter, clock, topic_manager), fields(topic = %topic, subscription = %subscription))]
    pub async fn start(
        hot: Arc<dyn HotStore>,
        retry_scheduler: RetryScheduler,
        dead_letter: DeadLetterSink,
        clock: Arc<dyn WallClock>,
        names: KeyNamer,
        topic_manager: &TopicManager,
        topic: &str,
        subscription: &str,
        consumer_id: Option<String>,
    ) -> Result<Self, BrokerError> {
        let config = topic_manager
            .get_subscription_config(topic, subscription)
            .await?
            .ok_or_else(|| BrokerError::SubscriptionNotFound {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
            })?;

        let consumer_id = consumer_id.unwrap_or_else(|| {
            format!("consumer-{}-{}", clock.now_epoch_millis(), rand::thread_rng().gen::<u32>())
        });

        Ok(Self {
            inner: Arc::new(ConsumerLoopInner {
                hot,
                retry_scheduler,
                dead_letter,
                clock,
                names,
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                consumer_id,
                config,
                delivery_counts: std::sync::Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn consumer_id(&self) -> &str {
        &self.inner.consumer_id
    }

    /// Run one iteration: drain ready retries back into the log, reclaim
    /// stale in-flight entries, read new entries for this consumer, and
    /// return a handle per entry. Internal failures in drain/reclaim are
    /// logged and swallowed so the loop keeps making progress (spec §7
    /// propagation policy); a failure in the read step is the only one
    /// that propagates, since without it there is nothing to dispatch.
    #[instrument(skip(self), fields(topic = %self.inner.topic, subscription = %self.inner.subscription, consumer_id = %self.inner.consumer_id))]
    pub async fn poll(&self) -> Result<Vec<Message>, BrokerError> {
        self.drain_retries().await;
        self.reclaim().await;

        let log = self.inner.log();
        let group = self.inner.group();
        let entries = self
            .inner
            .hot
            .group_read(
                &log,
                &group,
                &self.inner.consumer_id,
                self.inner.config.block_ms,
                self.inner.config.count_per_read,
            )
            .await?;

        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload_json = entry.fields.get("payload").cloned().unwrap_or_default();
            let headers_json = entry.fields.get("headers").cloned().unwrap_or_default();

            let (payload, mut headers) = match (decode_payload(&entry.id, &payload_json), decode_headers(&entry.id, &headers_json)) {
                (Ok(p), Ok(h)) => (p, h),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(id = %entry.id, error = %e, "dropping entry with unparsable payload");
                    if let Err(ack_err) = self.inner.hot.group_ack(&log, &group, &[entry.id.clone()]).await {
                        warn!(id = %entry.id, error = %ack_err, "failed to ack unparsable entry");
                    }
                    continue;
                }
            };
            // A synthetic retry entry carries `retryOf`/`attempt` as their own
            // log fields (see drain_retries); surface them on the headers the
            // consumer sees, per the `headers.retryOf` contract.
            if let Some(retry_of) = entry.fields.get("retryOf") {
                headers.insert("retryOf".to_string(), retry_of.clone());
            }
            if let Some(attempt) = entry.fields.get("attempt") {
                headers.insert("attempt".to_string(), attempt.clone());
            }

            let redelivery_count = {
                let mut counts = self.inner.delivery_counts.lock().unwrap();
                let count = counts.entry(entry.id.clone()).or_insert(0);
                let observed = *count;
                *count += 1;
                observed
            };

            messages.push(Message {
                id: entry.id,
                topic: self.inner.topic.clone(),
                subscription: self.inner.subscription.clone(),
                headers,
                payload,
                redelivery_count,
                settled: AtomicBool::new(false),
                loop_handle: self.inner.clone(),
            });
        }

        info!(count = messages.len(), "dispatched entries");
        Ok(messages)
    }

    async fn drain_retries(&self) {
        let ready = match self.inner.retry_scheduler.drain_ready(&self.inner.topic, &self.inner.subscription, 10).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "retry drain failed");
                return;
            }
        };

        let log = self.inner.log();
        for entry in ready {
            let mut fields: Fields = HashMap::new();
            fields.insert("payload".to_string(), entry.payload.clone());
            fields.insert(
                "headers".to_string(),
                serde_json::to_string(&entry.headers).unwrap_or_default(),
            );
            fields.insert("retryOf".to_string(), entry.original_id.clone());
            fields.insert("attempt".to_string(), entry.attempt.to_string());
            fields.insert("publishedAt".to_string(), self.inner.clock.now_iso());

            if let Err(e) = self.inner.hot.log_append(&log, fields, 100_000).await {
                warn!(error = %e, "failed to re-append retry entry");
                continue;
            }
            if let Err(e) = self
                .inner
                .retry_scheduler
                .remove_retry(&self.inner.topic, &self.inner.subscription, &entry)
                .await
            {
                warn!(error = %e, "failed to remove drained retry entry");
            }
        }
    }

    async fn reclaim(&self) {
        let log = self.inner.log();
        let group = self.inner.group();
        if let Err(e) = self
            .inner
            .hot
            .group_reclaim(&log, &group, &self.inner.consumer_id, self.inner.config.visibility_timeout_ms, 10)
            .await
        {
            warn!(error = %e, "reclaim failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenWallClock;
    use crate::producer::{Producer, PublishOptions};
    use crate::testkit::{InMemoryHotStore, InMemoryWarmStore};
    use crate::warmstore::WarmStore;

    struct Fixture {
        hot: Arc<InMemoryHotStore>,
        warm: Arc<InMemoryWarmStore>,
        clock: Arc<FrozenWallClock>,
        names: KeyNamer,
        topic_manager: TopicManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FrozenWallClock::at(0));
        let hot = Arc::new(InMemoryHotStore::new(clock.clone()));
        let warm: Arc<InMemoryWarmStore> = Arc::new(InMemoryWarmStore::new());
        let names = KeyNamer::new("cw:", "t1", "ns");
        let topic_manager = TopicManager::new(hot.clone(), warm.clone() as Arc<dyn WarmStore>, clock.clone(), names.clone(), "t1");
        Fixture { hot, warm, clock, names, topic_manager }
    }

    impl Fixture {
        fn producer(&self) -> Producer {
            Producer::new(
                self.hot.clone(),
                self.warm.clone(),
                self.clock.clone(),
                self.names.clone(),
                "t1",
                262_144,
                100_000,
            )
        }

        async fn start_loop(&self, topic: &str, subscription: &str) -> ConsumerLoop {
            let retry_scheduler = RetryScheduler::new(self.hot.clone(), self.clock.clone(), self.names.clone());
            let dead_letter =
                DeadLetterSink::new(self.hot.clone(), self.warm.clone(), self.clock.clone(), self.names.clone(), "t1", 100_000);
            ConsumerLoop::start(
                self.hot.clone(),
                retry_scheduler,
                dead_letter,
                self.clock.clone(),
                self.names.clone(),
                &self.topic_manager,
                topic,
                subscription,
                Some("consumer-test".to_string()),
            )
            .await
            .unwrap()
        }

        async fn ensure_subscription(&self, topic: &str, subscription: &str, max_deliveries: u32, visibility_timeout_ms: u64, backoff_ms: Vec<u64>) {
            let config = SubscriptionConfig {
                visibility_timeout_ms,
                max_deliveries,
                retry_backoff_ms: backoff_ms,
                dead_letter_enabled: true,
                shard_count: 1,
                block_ms: 100,
                count_per_read: 10,
                created_at: String::new(),
            };
            self.topic_manager.ensure_subscription(topic, subscription, config).await.unwrap();
        }
    }

    #[tokio::test]
    async fn publish_then_ack_clears_delivery_and_leaves_no_dlq() {
        let fx = fixture();
        fx.ensure_subscription("orders", "fraud", 3, 1000, vec![100, 200, 400]).await;
        fx.producer().publish("orders", &serde_json::json!({"id": "A"}), &PublishOptions::default()).await.unwrap();

        let consumer = fx.start_loop("orders", "fraud").await;
        let messages = consumer.poll().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].redelivery_count, 0);
        messages[0].ack().await.unwrap();

        let dead_letter =
            DeadLetterSink::new(fx.hot.clone(), fx.warm.clone(), fx.clock.clone(), fx.names.clone(), "t1", 100_000);
        assert_eq!(dead_letter.dlq_length("orders").await.unwrap(), 0);
        assert_eq!(fx.topic_manager.get_stats("orders").await.unwrap().length, 1);
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_as_retry_of() {
        let fx = fixture();
        fx.ensure_subscription("orders", "fraud", 3, 1000, vec![100, 200, 400]).await;
        let msg_id =
            fx.producer().publish("orders", &serde_json::json!({"id": "B"}), &PublishOptions::default()).await.unwrap();

        let consumer = fx.start_loop("orders", "fraud").await;
        let messages = consumer.poll().await.unwrap();
        assert_eq!(messages[0].redelivery_count, 0);
        messages[0].nack(NackOptions { requeue: true, delay_ms: None }).await.unwrap();

        // Not ready immediately.
        let immediate = consumer.poll().await.unwrap();
        assert!(immediate.is_empty());

        fx.clock.advance(130); // first backoff (100ms) + up to 20% jitter
        let retried = consumer.poll().await.unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].headers.get("retryOf"), Some(&msg_id));
        assert_eq!(retried[0].payload, serde_json::json!({"id": "B"}));
    }

    #[tokio::test]
    async fn dead_letters_after_max_deliveries() {
        let fx = fixture();
        fx.ensure_subscription("orders", "fraud", 3, 1000, vec![10, 10, 10]).await;
        fx.producer().publish("orders", &serde_json::json!({"id": "C"}), &PublishOptions::default()).await.unwrap();

        let consumer = fx.start_loop("orders", "fraud").await;
        let dead_letter =
            DeadLetterSink::new(fx.hot.clone(), fx.warm.clone(), fx.clock.clone(), fx.names.clone(), "t1", 100_000);

        for i in 0..3 {
            let messages = consumer.poll().await.unwrap();
            assert_eq!(messages.len(), 1, "iteration {i} should redeliver one message");
            assert_eq!(messages[0].redelivery_count, i as u32);
            messages[0].nack(NackOptions { requeue: true, delay_ms: None }).await.unwrap();
            fx.clock.advance(15);
        }

        assert_eq!(dead_letter.dlq_length("orders").await.unwrap(), 1);
        let entries = dead_letter.peek_dlq("orders", 10).await.unwrap();
        assert_eq!(entries[0].reason, MAX_DELIVERIES_EXCEEDED);
    }

    #[tokio::test]
    async fn reclaim_redelivers_after_visibility_timeout() {
        let fx = fixture();
        fx.ensure_subscription("orders", "fraud", 3, 1000, vec![100, 200, 400]).await;
        fx.producer().publish("orders", &serde_json::json!({"id": "D"}), &PublishOptions::default()).await.unwrap();

        let consumer1 = fx.start_loop("orders", "fraud").await;
        let first = consumer1.poll().await.unwrap();
        assert_eq!(first.len(), 1);
        // Consumer 1 dies without acking.

        fx.clock.advance(1500);
        let consumer2 = ConsumerLoop::start(
            fx.hot.clone(),
            RetryScheduler::new(fx.hot.clone(), fx.clock.clone(), fx.names.clone()),
            DeadLetterSink::new(fx.hot.clone(), fx.warm.clone(), fx.clock.clone(), fx.names.clone(), "t1", 100_000),
            fx.clock.clone(),
            fx.names.clone(),
            &fx.topic_manager,
            "orders",
            "fraud",
            Some("consumer-2".to_string()),
        )
        .await
        .unwrap();

        let second = consumer2.poll().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
    }

    #[tokio::test]
    async fn unknown_subscription_fails_to_start() {
        let fx = fixture();
        fx.topic_manager.ensure_topic("orders").await.unwrap();
        let err = ConsumerLoop::start(
            fx.hot.clone(),
            RetryScheduler::new(fx.hot.clone(), fx.clock.clone(), fx.names.clone()),
            DeadLetterSink::new(fx.hot.clone(), fx.warm.clone(), fx.clock.clone(), fx.names.clone(), "t1", 100_000),
            fx.clock.clone(),
            fx.names.clone(),
            &fx.topic_manager,
            "orders",
            "ghost",
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::SubscriptionNotFound { .. }));
    }
}
