//! Shared-Memory Engine (C7): dual-tier key/value access. The warm tier is
//! the source of truth for durability; the hot tier is a fast cache with a
//! bounded lifetime (spec §4.5).

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::clock::WallClock;
use crate::codec::to_json_string;
use crate::error::BrokerError;
use crate::hotstore::HotStore;
use crate::keyname::KeyNamer;
use crate::warmstore::{Collection, Filter, SystemMeta, WarmStore};

/// How a `set()` call should be mirrored to the warm tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStrategy {
    /// Always insert a new warm row (historical versions accumulate).
    Append,
    /// Upsert in place, keyed by `(key, namespace, tenant)`.
    Latest,
}

/// Options for `SharedMemoryEngine::set`.
#[derive(Debug, Clone)]
pub struct SetOptions {
    pub hot_ttl_sec: Option<u64>,
    pub warm_persist: bool,
    pub warm_strategy: UpsertStrategy,
    pub max_value_bytes: usize,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { hot_ttl_sec: None, warm_persist: false, warm_strategy: UpsertStrategy::Latest, max_value_bytes: 262_144 }
    }
}

pub struct SharedMemoryEngine {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    clock: Arc<dyn WallClock>,
    names: KeyNamer,
    tenant: String,
    namespace: String,
}

impl SharedMemoryEngine {
    pub fn new(
        hot: Arc<dyn HotStore>,
        warm: Arc<dyn WarmStore>,
        clock: Arc<dyn WallClock>,
        names: KeyNamer,
        tenant: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self { hot, warm, clock, names, tenant: tenant.into(), namespace: namespace.into() }
    }

    fn filter(&self, name: &str) -> Filter {
        let mut filter = Filter::new();
        filter.insert("key".to_string(), Value::String(name.to_string()));
        filter.insert("namespace".to_string(), Value::String(self.namespace.clone()));
        filter.insert("tenant".to_string(), Value::String(self.tenant.clone()));
        filter
    }

    #[instrument(skip(self, value), fields(name = %name))]
    pub async fn set(&self, name: &str, value: &Value, opts: &SetOptions) -> Result<(), BrokerError> {
        let encoded = to_json_string(value)?;
        if encoded.len() > opts.max_value_bytes {
            return Err(BrokerError::PayloadTooLarge { size: encoded.len(), max: opts.max_value_bytes });
        }

        let key = self.names.shared_memory_key(name);
        self.hot.kv_set(&key, encoded.into_bytes(), opts.hot_ttl_sec).await?;

        if opts.warm_persist {
            let now = self.clock.now_iso();
            let doc = serde_json::json!({
                "key": name,
                "namespace": self.namespace,
                "tenant": self.tenant,
                "value": value,
                "_system": SystemMeta { created_at: now.clone(), updated_at: Some(now), retention_days: None, tombstone: None, deleted_at: None },
            });
            match opts.warm_strategy {
                UpsertStrategy::Append => self.warm.insert(Collection::SharedMemory, doc).await?,
                UpsertStrategy::Latest => self.warm.upsert(Collection::SharedMemory, self.filter(name), doc).await?,
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(name = %name))]
    pub async fn get(&self, name: &str) -> Result<Option<Value>, BrokerError> {
        let key = self.names.shared_memory_key(name);
        if let Some(bytes) = self.hot.kv_get(&key).await? {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| BrokerError::ParseError { id: key.clone(), reason: e.to_string() })?;
            return Ok(Some(value));
        }

        let doc = self.warm.find_one(Collection::SharedMemory, self.filter(name)).await?;
        Ok(doc.and_then(|d| d.get("value").cloned()).filter(|v| !v.is_null()))
    }

    #[instrument(skip(self), fields(name = %name))]
    pub async fn del(&self, name: &str, tombstone: bool) -> Result<(), BrokerError> {
        let key = self.names.shared_memory_key(name);
        self.hot.kv_del(&[key]).await?;

        if tombstone {
            let now = self.clock.now_iso();
            let doc = serde_json::json!({
                "key": name,
                "namespace": self.namespace,
                "tenant": self.tenant,
                "value": Value::Null,
                "_system": SystemMeta { created_at: now.clone(), updated_at: Some(now.clone()), retention_days: None, tombstone: Some(true), deleted_at: Some(now) },
            });
            self.warm.upsert(Collection::SharedMemory, self.filter(name), doc).await?;
        }
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> Result<bool, BrokerError> {
        let key = self.names.shared_memory_key(name);
        Ok(self.hot.kv_exists(&[key]).await? > 0)
    }

    pub async fn expire(&self, name: &str, ttl_sec: u64) -> Result<bool, BrokerError> {
        let key = self.names.shared_memory_key(name);
        Ok(self.hot.kv_expire(&key, ttl_sec).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenWallClock;
    use crate::testkit::{InMemoryHotStore, InMemoryWarmStore};

    fn engine(clock: Arc<FrozenWallClock>) -> SharedMemoryEngine {
        let hot = Arc::new(InMemoryHotStore::new(clock.clone()));
        let warm = Arc::new(InMemoryWarmStore::new());
        SharedMemoryEngine::new(hot, warm, clock, KeyNamer::new("cw:", "t1", "ns"), "t1", "ns")
    }

    #[tokio::test]
    async fn round_trip_kv_without_warm() {
        let clock = Arc::new(FrozenWallClock::at(0));
        let engine = engine(clock.clone());
        let value = serde_json::json!({"v": 1});
        engine.set("k", &value, &SetOptions::default()).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn hot_ttl_expiry_without_warm_returns_none() {
        let clock = Arc::new(FrozenWallClock::at(0));
        let engine = engine(clock.clone());
        let value = serde_json::json!({"v": 1});
        let opts = SetOptions { hot_ttl_sec: Some(1), ..Default::default() };
        engine.set("k", &value, &opts).await.unwrap();
        clock.advance(1001);
        assert_eq!(engine.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn warm_fallback_serves_after_hot_expiry() {
        let clock = Arc::new(FrozenWallClock::at(0));
        let engine = engine(clock.clone());
        let value = serde_json::json!({"v": 1});
        let opts = SetOptions { hot_ttl_sec: Some(1), warm_persist: true, ..Default::default() };
        engine.set("k", &value, &opts).await.unwrap();
        clock.advance(2000);
        assert_eq!(engine.get("k").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn tombstone_delete_blocks_warm_fallback() {
        let clock = Arc::new(FrozenWallClock::at(0));
        let engine = engine(clock.clone());
        let value = serde_json::json!({"v": 1});
        let opts = SetOptions { warm_persist: true, ..Default::default() };
        engine.set("k", &value, &opts).await.unwrap();
        engine.del("k", true).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_rejects_oversize_value() {
        let clock = Arc::new(FrozenWallClock::at(0));
        let engine = engine(clock.clone());
        let huge = serde_json::json!({ "blob": "x".repeat(100) });
        let opts = SetOptions { max_value_bytes: 10, ..Default::default() };
        let err = engine.set("k", &huge, &opts).await.unwrap_err();
        assert!(matches!(err, BrokerError::PayloadTooLarge { .. }));
    }
}
