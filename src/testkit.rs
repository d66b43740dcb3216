//! In-process `HotStore` and `WarmStore` test doubles. Gated behind
//! `#[cfg(any(test, feature = "testkit"))]` so downstream crates
//! (`chronow-redis`, `chronow-mongo`, `chronow-cookbook`) can run the same
//! property tests against a real backend and against these in-memory
//! equivalents without pulling in a test-only dependency.
//!
//! Unlike `NullWarmStore`, `InMemoryWarmStore` actually stores documents —
//! it is what P2/P6-style property tests run against when a real warm
//! backend isn't available.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::WallClock;
use crate::error::{HotStoreError, WarmStoreError};
use crate::hotstore::{Fields, HotStore, LogInfo, PendingEntry, StreamEntry, StreamId};
use crate::warmstore::{Collection, Filter, WarmStore};

#[derive(Debug, Clone)]
struct KvEntry {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct PendingInfo {
    consumer: String,
    delivered_at_ms: u64,
    deliveries: u64,
}

#[derive(Debug, Default, Clone)]
struct GroupState {
    last_id: String,
    pending: BTreeMap<StreamId, PendingInfo>,
}

#[derive(Debug, Default, Clone)]
struct StreamState {
    entries: BTreeMap<StreamId, Fields>,
    groups: std::collections::HashMap<String, GroupState>,
    seq: u64,
    last_ms: u64,
}

#[derive(Debug, Default)]
struct State {
    kv: std::collections::HashMap<String, KvEntry>,
    hashes: std::collections::HashMap<String, std::collections::HashMap<String, String>>,
    streams: std::collections::HashMap<String, StreamState>,
    zsets: std::collections::HashMap<String, Vec<(f64, String)>>,
}

/// An entirely in-memory `HotStore`, driven by an injected `WallClock` so
/// TTL expiry and idle-time math are deterministic in tests.
#[derive(Debug)]
pub struct InMemoryHotStore {
    clock: Arc<dyn WallClock>,
    state: Mutex<State>,
}

impl InMemoryHotStore {
    pub fn new(clock: Arc<dyn WallClock>) -> Self {
        Self { clock, state: Mutex::new(State::default()) }
    }

    fn now(&self) -> u64 {
        self.clock.now_epoch_millis()
    }

    fn next_id(stream: &mut StreamState, now_ms: u64) -> StreamId {
        if now_ms == stream.last_ms {
            stream.seq += 1;
        } else {
            stream.last_ms = now_ms;
            stream.seq = 0;
        }
        format!("{now_ms:013}-{:06}", stream.seq)
    }
}

#[async_trait]
impl HotStore for InMemoryHotStore {
    async fn kv_set(&self, key: &str, value: Vec<u8>, ttl_sec: Option<u64>) -> Result<(), HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let expires_at = ttl_sec.map(|s| self.now() + s * 1000);
        state.kv.insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let now = self.now();
        if let Some(entry) = state.kv.get(key) {
            if entry.expires_at.is_some_and(|exp| exp <= now) {
                state.kv.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn kv_del(&self, keys: &[String]) -> Result<u64, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        for key in keys {
            let mut removed = state.kv.remove(key).is_some();
            removed |= state.hashes.remove(key).is_some();
            removed |= state.streams.remove(key).is_some();
            removed |= state.zsets.remove(key).is_some();
            if removed {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn kv_exists(&self, keys: &[String]) -> Result<u64, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let now = self.now();
        let mut count = 0;
        for key in keys {
            let expired = state.kv.get(key).is_some_and(|e| e.expires_at.is_some_and(|exp| exp <= now));
            if expired {
                state.kv.remove(key);
                continue;
            }
            if state.kv.contains_key(key) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn kv_expire(&self, key: &str, ttl_sec: u64) -> Result<bool, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let now = self.now();
        if let Some(entry) = state.kv.get_mut(key) {
            entry.expires_at = Some(now + ttl_sec * 1000);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), HotStoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, HotStoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn log_append(&self, log: &str, entry: Fields, max_len: u64) -> Result<StreamId, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let now = self.now();
        let stream = state.streams.entry(log.to_string()).or_default();
        let id = Self::next_id(stream, now);
        stream.entries.insert(id.clone(), entry);
        while stream.entries.len() as u64 > max_len {
            if let Some(oldest) = stream.entries.keys().next().cloned() {
                stream.entries.remove(&oldest);
            } else {
                break;
            }
        }
        Ok(id)
    }

    async fn group_create(&self, log: &str, group: &str, start_id: &str) -> Result<(), HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let stream = state.streams.entry(log.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Err(HotStoreError::AlreadyExists { log: log.to_string(), group: group.to_string() });
        }
        stream
            .groups
            .insert(group.to_string(), GroupState { last_id: start_id.to_string(), pending: BTreeMap::new() });
        Ok(())
    }

    async fn group_destroy(&self, log: &str, group: &str) -> Result<(), HotStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(stream) = state.streams.get_mut(log) {
            stream.groups.remove(group);
        }
        Ok(())
    }

    async fn group_read(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        _block_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let now = self.now();
        let stream = state
            .streams
            .get_mut(log)
            .ok_or_else(|| HotStoreError::Transient(format!("log {log} not found")))?;
        let group_state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| HotStoreError::Transient(format!("group {group} not found on {log}")))?;

        let last_id = group_state.last_id.clone();
        let mut delivered = Vec::new();
        for (id, fields) in stream.entries.range::<String, _>(..) {
            if delivered.len() as u64 >= count {
                break;
            }
            if id.as_str() <= last_id.as_str() {
                continue;
            }
            delivered.push((id.clone(), fields.clone()));
        }

        for (id, _) in &delivered {
            group_state.last_id = id.clone();
            group_state.pending.insert(
                id.clone(),
                PendingInfo { consumer: consumer.to_string(), delivered_at_ms: now, deliveries: 1 },
            );
        }

        Ok(delivered.into_iter().map(|(id, fields)| StreamEntry { id, fields }).collect())
    }

    async fn group_ack(&self, log: &str, group: &str, ids: &[StreamId]) -> Result<u64, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        if let Some(stream) = state.streams.get_mut(log) {
            if let Some(group_state) = stream.groups.get_mut(group) {
                for id in ids {
                    if group_state.pending.remove(id).is_some() {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    async fn group_reclaim(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let now = self.now();
        let stream = match state.streams.get_mut(log) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let entries_snapshot = stream.entries.clone();
        let group_state = match stream.groups.get_mut(group) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };

        let stale: Vec<StreamId> = group_state
            .pending
            .iter()
            .filter(|(_, info)| now.saturating_sub(info.delivered_at_ms) >= min_idle_ms)
            .take(count as usize)
            .map(|(id, _)| id.clone())
            .collect();

        let mut reclaimed = Vec::new();
        for id in stale {
            if let Some(fields) = entries_snapshot.get(&id) {
                if let Some(info) = group_state.pending.get_mut(&id) {
                    info.consumer = consumer.to_string();
                    info.delivered_at_ms = now;
                    info.deliveries += 1;
                }
                reclaimed.push(StreamEntry { id, fields: fields.clone() });
            } else {
                group_state.pending.remove(&id);
            }
        }
        Ok(reclaimed)
    }

    async fn group_pending(&self, log: &str, group: &str, count: u64) -> Result<Vec<PendingEntry>, HotStoreError> {
        let state = self.state.lock().unwrap();
        let now = self.now();
        let Some(stream) = state.streams.get(log) else { return Ok(Vec::new()) };
        let Some(group_state) = stream.groups.get(group) else { return Ok(Vec::new()) };
        Ok(group_state
            .pending
            .iter()
            .take(count as usize)
            .map(|(id, info)| PendingEntry {
                id: id.clone(),
                consumer: info.consumer.clone(),
                idle_ms: now.saturating_sub(info.delivered_at_ms),
                deliveries: info.deliveries,
            })
            .collect())
    }

    async fn log_len(&self, log: &str) -> Result<u64, HotStoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.streams.get(log).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn log_range(&self, log: &str, start: &str, end: &str, count: u64) -> Result<Vec<StreamEntry>, HotStoreError> {
        let state = self.state.lock().unwrap();
        let Some(stream) = state.streams.get(log) else { return Ok(Vec::new()) };
        // "-" / "+" are the smallest/largest-id sentinels (as in a real streaming
        // log's range command); anything else is taken as a literal id bound.
        let matches = |id: &str| {
            (start == "-" || id >= start) && (end == "+" || id <= end)
        };
        Ok(stream
            .entries
            .iter()
            .filter(|(id, _)| matches(id))
            .take(count as usize)
            .map(|(id, fields)| StreamEntry { id: id.clone(), fields: fields.clone() })
            .collect())
    }

    async fn log_info(&self, log: &str) -> Result<LogInfo, HotStoreError> {
        let state = self.state.lock().unwrap();
        match state.streams.get(log) {
            Some(stream) => Ok(LogInfo { length: stream.entries.len() as u64, groups: stream.groups.len() as u64 }),
            None => Ok(LogInfo::default()),
        }
    }

    async fn zset_add(&self, key: &str, score: f64, member: String) -> Result<(), HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let set = state.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != &member);
        set.push((score, member));
        Ok(())
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64, limit: u64) -> Result<Vec<String>, HotStoreError> {
        let state = self.state.lock().unwrap();
        let Some(set) = state.zsets.get(key) else { return Ok(Vec::new()) };
        let mut matching: Vec<(f64, String)> =
            set.iter().filter(|(score, _)| *score >= min && *score <= max).cloned().collect();
        matching.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matching.into_iter().take(limit as usize).map(|(_, member)| member).collect())
    }

    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<u64, HotStoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(set) = state.zsets.get_mut(key) else { return Ok(0) };
        let before = set.len();
        set.retain(|(_, m)| !members.contains(m));
        Ok((before - set.len()) as u64)
    }

    async fn zset_card(&self, key: &str) -> Result<u64, HotStoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }
}

/// An in-memory `WarmStore` backed by one `Vec<Value>` per logical collection,
/// matched with a naive linear-scan `filter` match (top-level key equality).
#[derive(Debug, Default)]
pub struct InMemoryWarmStore {
    collections: Mutex<std::collections::HashMap<&'static str, Vec<Value>>>,
}

impl InMemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn name(collection: Collection) -> &'static str {
        match collection {
            Collection::SharedMemory => "shared_memory",
            Collection::Topics => "topics",
            Collection::Messages => "messages",
            Collection::DeadLetters => "dead_letters",
        }
    }

    fn matches(doc: &Value, filter: &Filter) -> bool {
        filter.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

#[async_trait]
impl WarmStore for InMemoryWarmStore {
    async fn insert(&self, collection: Collection, doc: Value) -> Result<(), WarmStoreError> {
        let mut collections = self.collections.lock().unwrap();
        collections.entry(Self::name(collection)).or_default().push(doc);
        Ok(())
    }

    async fn upsert(&self, collection: Collection, filter: Filter, doc: Value) -> Result<(), WarmStoreError> {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(Self::name(collection)).or_default();
        if let Some(existing) = docs.iter_mut().find(|d| Self::matches(d, &filter)) {
            *existing = doc;
        } else {
            docs.push(doc);
        }
        Ok(())
    }

    async fn find_one(&self, collection: Collection, filter: Filter) -> Result<Option<Value>, WarmStoreError> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(Self::name(collection))
            .and_then(|docs| docs.iter().find(|d| Self::matches(d, &filter)).cloned()))
    }

    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Value>, WarmStoreError> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(Self::name(collection))
            .map(|docs| docs.iter().filter(|d| Self::matches(d, &filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_many(&self, collection: Collection, filter: Filter) -> Result<u64, WarmStoreError> {
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(Self::name(collection)) else { return Ok(0) };
        let before = docs.len();
        docs.retain(|d| !Self::matches(d, &filter));
        Ok((before - docs.len()) as u64)
    }
}
