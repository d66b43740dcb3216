//! Hot-tier store abstraction (C1): the minimal command surface the broker
//! needs from a streaming-log + KV + sorted-set + hash store. Two backends
//! implement this trait — `chronow-redis` over a real streaming-log store,
//! `chronow-mongo` emulating the same primitives by polling collections —
//! and the broker never branches on which one it is talking to.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::HotStoreError;

/// Id assigned by the log on append: `<ms-timestamp>-<seq>`.
pub type StreamId = String;

/// A log entry's field map (`payload`, `headers`, `hash`, `size`, ... as strings).
pub type Fields = HashMap<String, String>;

/// One entry read back from a log, paired with its assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Fields,
}

/// One in-flight entry as reported by `groupPending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: StreamId,
    pub consumer: String,
    pub idle_ms: u64,
    pub deliveries: u64,
}

/// Summary of a log for stats reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogInfo {
    pub length: u64,
    pub groups: u64,
}

/// The hot-tier store's capability set (spec §4.1). Every operation is
/// asynchronous and expected to be safe under concurrent callers; the two
/// backends differ only in how they provide that safety (native atomic
/// commands vs. compare-and-swap-style document updates).
#[async_trait]
pub trait HotStore: Send + Sync {
    // -- Keyed byte store --------------------------------------------------

    async fn kv_set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_sec: Option<u64>,
    ) -> Result<(), HotStoreError>;

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, HotStoreError>;

    /// Remove zero or more keys; returns the number actually removed.
    async fn kv_del(&self, keys: &[String]) -> Result<u64, HotStoreError>;

    /// Count of the given keys that currently exist (and are unexpired).
    async fn kv_exists(&self, keys: &[String]) -> Result<u64, HotStoreError>;

    /// Set a TTL on an existing key; `false` if the key is absent.
    async fn kv_expire(&self, key: &str, ttl_sec: u64) -> Result<bool, HotStoreError>;

    // -- Hash ----------------------------------------------------------------

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), HotStoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, HotStoreError>;

    // -- Streaming log + consumer groups -------------------------------------

    /// Append `entry` to `log`, soft-trimming toward `max_len`; returns the new id.
    async fn log_append(
        &self,
        log: &str,
        entry: Fields,
        max_len: u64,
    ) -> Result<StreamId, HotStoreError>;

    /// Create a consumer group starting at `start_id`. Idempotent creation is
    /// signalled as `HotStoreError::AlreadyExists`, which callers (the Topic
    /// Manager) swallow.
    async fn group_create(&self, log: &str, group: &str, start_id: &str)
        -> Result<(), HotStoreError>;

    async fn group_destroy(&self, log: &str, group: &str) -> Result<(), HotStoreError>;

    /// Deliver up to `count` never-before-delivered entries to `consumer`,
    /// blocking up to `block_ms` if none are available yet. Each returned
    /// entry is recorded as in-flight for `(group, consumer)`.
    async fn group_read(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError>;

    /// Remove entries from the in-flight set for `group`; returns the count removed.
    async fn group_ack(&self, log: &str, group: &str, ids: &[StreamId])
        -> Result<u64, HotStoreError>;

    /// Transfer in-flight entries idle for more than `min_idle_ms` to `consumer`.
    async fn group_reclaim(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError>;

    /// Inspect in-flight entries for `group`.
    async fn group_pending(
        &self,
        log: &str,
        group: &str,
        count: u64,
    ) -> Result<Vec<PendingEntry>, HotStoreError>;

    async fn log_len(&self, log: &str) -> Result<u64, HotStoreError>;

    /// Read a range `[start, end]` inclusive, up to `count` entries.
    async fn log_range(
        &self,
        log: &str,
        start: &str,
        end: &str,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError>;

    async fn log_info(&self, log: &str) -> Result<LogInfo, HotStoreError>;

    // -- Sorted set (retry scheduling) ---------------------------------------

    async fn zset_add(&self, key: &str, score: f64, member: String) -> Result<(), HotStoreError>;

    /// Members scored within `[min, max]`, ascending by score, up to `limit`.
    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: u64,
    ) -> Result<Vec<String>, HotStoreError>;

    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<u64, HotStoreError>;

    async fn zset_card(&self, key: &str) -> Result<u64, HotStoreError>;
}
