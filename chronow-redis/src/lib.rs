//! Native hot-tier backend: `chronow_core::HotStore` over real Redis Streams
//! (XADD/XREADGROUP/XCLAIM), bring-your-own connection manager.
//!
//! Every stream/consumer-group primitive the trait needs maps onto a single
//! Redis command; the only nontrivial piece is turning Redis's positional
//! reply shapes (`XRANGE`, `XPENDING` summary vs. extended form) into the
//! trait's typed structs.

use std::collections::HashMap;

use async_trait::async_trait;
use chronow_core::{Fields, HotStore, HotStoreError, LogInfo, PendingEntry, StreamEntry, StreamId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::instrument;

fn map_err(err: RedisError) -> HotStoreError {
    HotStoreError::Transient(err.to_string())
}

/// `chronow_core::HotStore` backed by a live Redis connection.
#[derive(Clone)]
pub struct RedisHotStore {
    conn: ConnectionManager,
}

impl RedisHotStore {
    /// Connect using a `redis://` URL, establishing a `ConnectionManager`
    /// that reconnects transparently on transient network failures.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, HotStoreError> {
        let client = redis::Client::open(url).map_err(|e| HotStoreError::ConnectFailed(e.to_string()))?;
        let conn = client.get_connection_manager().await.map_err(|e| HotStoreError::ConnectFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Wrap an already-established connection manager (for callers that
    /// share one client across several chronow instances or other services).
    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HotStore for RedisHotStore {
    #[instrument(skip(self, value), fields(key = %key))]
    async fn kv_set(&self, key: &str, value: Vec<u8>, ttl_sec: Option<u64>) -> Result<(), HotStoreError> {
        let mut conn = self.conn.clone();
        match ttl_sec {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await.map_err(map_err)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(map_err)?;
            }
        }
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, HotStoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn kv_del(&self, keys: &[String]) -> Result<u64, HotStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(map_err)
    }

    async fn kv_exists(&self, keys: &[String]) -> Result<u64, HotStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.exists(keys).await.map_err(map_err)
    }

    async fn kv_expire(&self, key: &str, ttl_sec: u64) -> Result<bool, HotStoreError> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_sec as i64).await.map_err(map_err)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), HotStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await.map_err(map_err)?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, HotStoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(map_err)
    }

    #[instrument(skip(self, entry), fields(log = %log))]
    async fn log_append(&self, log: &str, entry: Fields, max_len: u64) -> Result<StreamId, HotStoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(log).arg("MAXLEN").arg("~").arg(max_len).arg("*");
        for (field, value) in &entry {
            cmd.arg(field).arg(value);
        }
        cmd.query_async(&mut conn).await.map_err(map_err)
    }

    async fn group_create(&self, log: &str, group: &str, start_id: &str) -> Result<(), HotStoreError> {
        let mut conn = self.conn.clone();
        let result: Result<String, RedisError> =
            redis::cmd("XGROUP").arg("CREATE").arg(log).arg(group).arg(start_id).arg("MKSTREAM").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                Err(HotStoreError::AlreadyExists { log: log.to_string(), group: group.to_string() })
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn group_destroy(&self, log: &str, group: &str) -> Result<(), HotStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XGROUP").arg("DESTROY").arg(log).arg(group).query_async(&mut conn).await.map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(log = %log, group = %group, consumer = %consumer))]
    async fn group_read(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(log)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(entries_from_reply(reply))
    }

    async fn group_ack(&self, log: &str, group: &str, ids: &[StreamId]) -> Result<u64, HotStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        redis::cmd("XACK").arg(log).arg(group).arg(ids).query_async(&mut conn).await.map_err(map_err)
    }

    #[instrument(skip(self), fields(log = %log, group = %group, consumer = %consumer))]
    async fn group_reclaim(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut conn = self.conn.clone();
        let stale: Vec<(StreamId, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(log)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        if stale.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<StreamId> = stale.into_iter().map(|(id, ..)| id).collect();

        let reply: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(log)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(reply
            .ids
            .into_iter()
            .map(|id| StreamEntry { id: id.id, fields: fields_from_stream_map(id.map) })
            .collect())
    }

    async fn group_pending(&self, log: &str, group: &str, count: u64) -> Result<Vec<PendingEntry>, HotStoreError> {
        let mut conn = self.conn.clone();
        let rows: Vec<(StreamId, String, u64, u64)> =
            redis::cmd("XPENDING").arg(log).arg(group).arg("-").arg("+").arg(count).query_async(&mut conn).await.map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, consumer, idle_ms, deliveries)| PendingEntry { id, consumer, idle_ms, deliveries })
            .collect())
    }

    async fn log_len(&self, log: &str) -> Result<u64, HotStoreError> {
        let mut conn = self.conn.clone();
        conn.xlen(log).await.map_err(map_err)
    }

    async fn log_range(&self, log: &str, start: &str, end: &str, count: u64) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply =
            redis::cmd("XRANGE").arg(log).arg(start).arg(end).arg("COUNT").arg(count).query_async(&mut conn).await.map_err(map_err)?;
        Ok(reply.ids.into_iter().map(|row| StreamEntry { id: row.id, fields: fields_from_stream_map(row.map) }).collect())
    }

    async fn log_info(&self, log: &str) -> Result<LogInfo, HotStoreError> {
        let mut conn = self.conn.clone();
        let length: u64 = conn.xlen(log).await.map_err(map_err)?;
        let groups: Vec<redis::Value> = redis::cmd("XINFO").arg("GROUPS").arg(log).query_async(&mut conn).await.unwrap_or_default();
        Ok(LogInfo { length, groups: groups.len() as u64 })
    }

    async fn zset_add(&self, key: &str, score: f64, member: String) -> Result<(), HotStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await.map_err(map_err)?;
        Ok(())
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64, limit: u64) -> Result<Vec<String>, HotStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZRANGEBYSCORE").arg(key).arg(min).arg(max).arg("LIMIT").arg(0).arg(limit).query_async(&mut conn).await.map_err(map_err)
    }

    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<u64, HotStoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.zrem(key, members).await.map_err(map_err)
    }

    async fn zset_card(&self, key: &str) -> Result<u64, HotStoreError> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(map_err)
    }
}

fn fields_from_stream_map(map: HashMap<String, redis::Value>) -> Fields {
    map.into_iter()
        .filter_map(|(field, value)| match value {
            redis::Value::BulkString(bytes) => Some((field, String::from_utf8_lossy(&bytes).into_owned())),
            redis::Value::SimpleString(s) => Some((field, s)),
            _ => None,
        })
        .collect()
}

fn entries_from_reply(reply: redis::streams::StreamReadReply) -> Vec<StreamEntry> {
    reply
        .keys
        .into_iter()
        .flat_map(|key| key.ids)
        .map(|id| StreamEntry { id: id.id, fields: fields_from_stream_map(id.map) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_from_stream_map_decodes_bulk_strings() {
        let mut map = HashMap::new();
        map.insert("payload".to_string(), redis::Value::BulkString(b"{}".to_vec()));
        let fields = fields_from_stream_map(map);
        assert_eq!(fields.get("payload"), Some(&"{}".to_string()));
    }
}
