//! Retry Scheduler (C10): delayed requeue via sorted-set scoring by
//! next-attempt time (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::backoff::Backoff;
use crate::clock::WallClock;
use crate::error::BrokerError;
use crate::hotstore::HotStore;
use crate::jitter::Jitter;
use crate::keyname::KeyNamer;

/// A scheduled redelivery, keyed in the sorted set by a synthetic id rather
/// than by re-deriving a byte-identical serialised string on removal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryEntry {
    pub retry_id: String,
    pub original_id: String,
    pub payload: String,
    pub headers: HashMap<String, String>,
    pub attempt: u32,
}

pub struct RetryScheduler {
    hot: Arc<dyn HotStore>,
    clock: Arc<dyn WallClock>,
    names: KeyNamer,
}

impl RetryScheduler {
    pub fn new(hot: Arc<dyn HotStore>, clock: Arc<dyn WallClock>, names: KeyNamer) -> Self {
        Self { hot, clock, names }
    }

    #[instrument(skip(self, payload, headers), fields(topic = %topic, subscription = %subscription, attempt = attempt))]
    pub async fn schedule_retry(
        &self,
        topic: &str,
        subscription: &str,
        original_id: &str,
        payload: &str,
        headers: HashMap<String, String>,
        attempt: u32,
        backoff: &Backoff,
        delay_override: Option<std::time::Duration>,
    ) -> Result<(), BrokerError> {
        let base_delay = delay_override.unwrap_or_else(|| backoff.delay(attempt as usize));
        let jittered = Jitter::bounded(0.2).apply(base_delay);
        let next_attempt_ms = self.clock.now_epoch_millis() + jittered.as_millis() as u64;

        let retry_id = format!("{original_id}:{attempt}:{}", rand::thread_rng().gen::<u32>());
        let entry = RetryEntry {
            retry_id: retry_id.clone(),
            original_id: original_id.to_string(),
            payload: payload.to_string(),
            headers,
            attempt,
        };
        let serialized = serde_json::to_string(&entry)
            .map_err(|e| BrokerError::ParseError { id: original_id.to_string(), reason: e.to_string() })?;

        let retry_key = self.names.retry_key(topic, subscription);
        self.hot.zset_add(&retry_key, next_attempt_ms as f64, serialized).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(topic = %topic, subscription = %subscription, limit = limit))]
    pub async fn drain_ready(&self, topic: &str, subscription: &str, limit: u64) -> Result<Vec<RetryEntry>, BrokerError> {
        let retry_key = self.names.retry_key(topic, subscription);
        let now = self.clock.now_epoch_millis() as f64;
        let raw = self.hot.zset_range_by_score(&retry_key, f64::NEG_INFINITY, now, limit).await?;

        let mut entries = Vec::with_capacity(raw.len());
        for serialized in raw {
            let entry: RetryEntry = serde_json::from_str(&serialized)
                .map_err(|e| BrokerError::ParseError { id: "<retry-entry>".into(), reason: e.to_string() })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    #[instrument(skip(self, entry), fields(topic = %topic, subscription = %subscription, retry_id = %entry.retry_id))]
    pub async fn remove_retry(&self, topic: &str, subscription: &str, entry: &RetryEntry) -> Result<(), BrokerError> {
        let serialized = serde_json::to_string(entry)
            .map_err(|e| BrokerError::ParseError { id: entry.retry_id.clone(), reason: e.to_string() })?;
        let retry_key = self.names.retry_key(topic, subscription);
        self.hot.zset_remove(&retry_key, &[serialized]).await?;
        Ok(())
    }
}
