//! Warm-Store Interface (C4): the durable document operations the broker
//! calls. The wire contract with a real document database is specified only
//! through this trait and the schemas below (spec §4.4); `chronow-mongo`
//! provides a real implementation, and this crate ships an in-memory stub
//! (`InMemoryWarmStore`) for embedding without a durable backend and for
//! tests that don't care about durability.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WarmStoreError;

/// Bookkeeping fields every warm document carries (spec's `_system` field).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SystemMeta {
    pub created_at: String,
    pub updated_at: Option<String>,
    pub retention_days: Option<u32>,
    pub tombstone: Option<bool>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedMemoryDoc {
    pub key: String,
    pub namespace: String,
    pub tenant: String,
    pub value: Option<Value>,
    #[serde(rename = "_system")]
    pub system: SystemMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicDoc {
    pub topic: String,
    pub tenant: String,
    pub shards: u32,
    pub created_at: String,
    #[serde(rename = "_system")]
    pub system: SystemMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDoc {
    pub topic: String,
    pub msg_id: Option<String>,
    pub tenant: String,
    pub headers: Value,
    pub payload: Value,
    pub first_seen_at: String,
    pub size: usize,
    #[serde(rename = "_system")]
    pub system: SystemMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterDoc {
    pub topic: String,
    pub msg_id: String,
    pub tenant: String,
    pub reason: String,
    pub headers: Value,
    pub payload: Value,
    pub failed_at: String,
    pub deliveries: u64,
    #[serde(rename = "_system")]
    pub system: SystemMeta,
}

/// A document value stored in one of the four logical collections, kept as an
/// untyped JSON `Value` at the trait boundary so the broker's callers can
/// serialize their own doc type without the store needing to know it.
pub type Filter = HashMap<String, Value>;

/// The four logical collections the broker writes to (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    SharedMemory,
    Topics,
    Messages,
    DeadLetters,
}

/// Durable document store the broker mirrors into. Every operation scopes to
/// one of the four logical collections; a real backend maps each to its own
/// physical collection/table.
#[async_trait]
pub trait WarmStore: Send + Sync {
    async fn insert(&self, collection: Collection, doc: Value) -> Result<(), WarmStoreError>;

    /// Insert-or-replace by `filter`; inserts if no document matches.
    async fn upsert(
        &self,
        collection: Collection,
        filter: Filter,
        doc: Value,
    ) -> Result<(), WarmStoreError>;

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Value>, WarmStoreError>;

    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Value>, WarmStoreError>;

    async fn delete_many(&self, collection: Collection, filter: Filter) -> Result<u64, WarmStoreError>;

    /// Release any held connections. Called once by `Broker::close()`.
    async fn close(&self) -> Result<(), WarmStoreError> {
        Ok(())
    }
}

/// The spec's "warm-store stub": `find_one` always returns `None`, writes are
/// no-ops. Useful for embedding the broker with no durability at all; P2/P6
/// property tests must run against a real `WarmStore` instead, not this.
#[derive(Debug, Default)]
pub struct NullWarmStore;

#[async_trait]
impl WarmStore for NullWarmStore {
    async fn insert(&self, _collection: Collection, _doc: Value) -> Result<(), WarmStoreError> {
        Ok(())
    }

    async fn upsert(
        &self,
        _collection: Collection,
        _filter: Filter,
        _doc: Value,
    ) -> Result<(), WarmStoreError> {
        Ok(())
    }

    async fn find_one(
        &self,
        _collection: Collection,
        _filter: Filter,
    ) -> Result<Option<Value>, WarmStoreError> {
        Ok(None)
    }

    async fn find(&self, _collection: Collection, _filter: Filter) -> Result<Vec<Value>, WarmStoreError> {
        Ok(Vec::new())
    }

    async fn delete_many(&self, _collection: Collection, _filter: Filter) -> Result<u64, WarmStoreError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_warm_store_find_one_is_always_none() {
        let store = NullWarmStore;
        let found = store.find_one(Collection::Messages, Filter::new()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn null_warm_store_delete_many_reports_zero() {
        let store = NullWarmStore;
        let removed = store.delete_many(Collection::DeadLetters, Filter::new()).await.unwrap();
        assert_eq!(removed, 0);
    }
}
