//! Topic Manager (C8): topic/subscription lifecycle and durable subscription
//! configuration (spec §4.6).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::clock::WallClock;
use crate::codec::to_json_string;
use crate::error::{BrokerError, HotStoreError};
use crate::hotstore::{HotStore, LogInfo};
use crate::keyname::KeyNamer;
use crate::warmstore::{Collection, Filter, SystemMeta, WarmStore};

/// Durable per-subscription configuration (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionConfig {
    pub visibility_timeout_ms: u64,
    pub max_deliveries: u32,
    pub retry_backoff_ms: Vec<u64>,
    pub dead_letter_enabled: bool,
    pub shard_count: u32,
    pub block_ms: u64,
    pub count_per_read: u64,
    pub created_at: String,
}

impl SubscriptionConfig {
    pub fn retry_backoff_durations(&self) -> Vec<Duration> {
        self.retry_backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
    }
}

/// Result of `getStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TopicStats {
    pub length: u64,
    pub groups: u64,
}

impl From<LogInfo> for TopicStats {
    fn from(info: LogInfo) -> Self {
        Self { length: info.length, groups: info.groups }
    }
}

pub struct TopicManager {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    clock: Arc<dyn WallClock>,
    names: KeyNamer,
    tenant: String,
}

impl TopicManager {
    pub fn new(hot: Arc<dyn HotStore>, warm: Arc<dyn WarmStore>, clock: Arc<dyn WallClock>, names: KeyNamer, tenant: impl Into<String>) -> Self {
        Self { hot, warm, clock, names, tenant: tenant.into() }
    }

    /// Swallow `already-exists`; propagate everything else.
    async fn swallow_already_exists(result: Result<(), HotStoreError>) -> Result<(), BrokerError> {
        match result {
            Ok(()) => Ok(()),
            Err(HotStoreError::AlreadyExists { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Force-create the underlying log via a throwaway group create/destroy
    /// pair — the only portable way to materialise an empty log across both
    /// hot-store backends — then warm-upsert a topic row.
    #[instrument(skip(self), fields(topic = %topic))]
    pub async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let log = self.names.topic_log(topic);
        Self::swallow_already_exists(self.hot.group_create(&log, "__ensure__", "0").await).await?;
        self.hot.group_destroy(&log, "__ensure__").await?;

        let now = self.clock.now_iso();
        let mut filter = Filter::new();
        filter.insert("topic".to_string(), serde_json::Value::String(topic.to_string()));
        filter.insert("tenant".to_string(), serde_json::Value::String(self.tenant.clone()));
        let doc = serde_json::json!({
            "topic": topic,
            "tenant": self.tenant,
            "shards": 1,
            "createdAt": now.clone(),
            "_system": SystemMeta { created_at: now.clone(), updated_at: Some(now), retention_days: None, tombstone: None, deleted_at: None },
        });
        self.warm.upsert(Collection::Topics, filter, doc).await?;
        Ok(())
    }

    #[instrument(skip(self, config), fields(topic = %topic, subscription = %subscription))]
    pub async fn ensure_subscription(
        &self,
        topic: &str,
        subscription: &str,
        mut config: SubscriptionConfig,
    ) -> Result<(), BrokerError> {
        self.ensure_topic(topic).await?;
        let log = self.names.topic_log(topic);
        let group = KeyNamer::group_name(subscription);
        Self::swallow_already_exists(self.hot.group_create(&log, &group, "0").await).await?;

        config.created_at = self.clock.now_iso();
        let config_key = self.names.subscription_config_key(topic, subscription);
        let json = to_json_string(&config)?;
        self.hot.hash_set(&config_key, "config", &json).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(topic = %topic, subscription = %subscription))]
    pub async fn get_subscription_config(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Option<SubscriptionConfig>, BrokerError> {
        let config_key = self.names.subscription_config_key(topic, subscription);
        let Some(raw) = self.hot.hash_get(&config_key, "config").await? else { return Ok(None) };
        let config: SubscriptionConfig = serde_json::from_str(&raw)
            .map_err(|e| BrokerError::ParseError { id: config_key, reason: e.to_string() })?;
        Ok(Some(config))
    }

    #[instrument(skip(self), fields(topic = %topic, subscription = %subscription))]
    pub async fn delete_subscription(&self, topic: &str, subscription: &str) -> Result<(), BrokerError> {
        let log = self.names.topic_log(topic);
        let group = KeyNamer::group_name(subscription);
        self.hot.group_destroy(&log, &group).await?;
        let config_key = self.names.subscription_config_key(topic, subscription);
        self.hot.kv_del(&[config_key]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(topic = %topic))]
    pub async fn purge_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let log = self.names.topic_log(topic);
        self.hot.kv_del(&[log]).await?;
        self.ensure_topic(topic).await
    }

    #[instrument(skip(self), fields(topic = %topic))]
    pub async fn get_stats(&self, topic: &str) -> Result<TopicStats, BrokerError> {
        let log = self.names.topic_log(topic);
        Ok(self.hot.log_info(&log).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenWallClock;
    use crate::testkit::{InMemoryHotStore, InMemoryWarmStore};

    fn manager() -> TopicManager {
        let clock = Arc::new(FrozenWallClock::at(0));
        let hot = Arc::new(InMemoryHotStore::new(clock.clone()));
        let warm = Arc::new(InMemoryWarmStore::new());
        TopicManager::new(hot, warm, clock, KeyNamer::new("cw:", "t1", "ns"), "t1")
    }

    fn config() -> SubscriptionConfig {
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
    async fn ensure_topic_is_idempotent() {
        let manager = manager();
        manager.ensure_topic("orders").await.unwrap();
        manager.ensure_topic("orders").await.unwrap();
        let stats = manager.get_stats("orders").await.unwrap();
        assert_eq!(stats.length, 0);
    }

    #[tokio::test]
    async fn ensure_subscription_persists_config() {
        let manager = manager();
        manager.ensure_subscription("orders", "fraud", config()).await.unwrap();
        let loaded = manager.get_subscription_config("orders", "fraud").await.unwrap().unwrap();
        assert_eq!(loaded.max_deliveries, 3);
        assert_eq!(loaded.retry_backoff_ms, vec![100, 200, 400]);
    }

    #[tokio::test]
    async fn get_subscription_config_is_none_when_absent() {
        let manager = manager();
        let loaded = manager.get_subscription_config("orders", "missing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn delete_subscription_clears_config() {
        let manager = manager();
        manager.ensure_subscription("orders", "fraud", config()).await.unwrap();
        manager.delete_subscription("orders", "fraud").await.unwrap();
        let loaded = manager.get_subscription_config("orders", "fraud").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn purge_topic_resets_length_but_stays_usable() {
        let manager = manager();
        manager.ensure_topic("orders").await.unwrap();
        let log = manager.names.topic_log("orders");
        manager.hot.log_append(&log, Default::default(), 100).await.unwrap();
        assert_eq!(manager.get_stats("orders").await.unwrap().length, 1);

        manager.purge_topic("orders").await.unwrap();
        assert_eq!(manager.get_stats("orders").await.unwrap().length, 0);

        manager.hot.log_append(&log, Default::default(), 100).await.unwrap();
        assert_eq!(manager.get_stats("orders").await.unwrap().length, 1);
    }
}
