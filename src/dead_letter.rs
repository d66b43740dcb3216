//! Dead-Letter Sink (C11): append to the DLQ log plus a warm copy,
//! inspection, and purge (spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::clock::WallClock;
use crate::codec::{decode_headers, decode_payload};
use crate::error::BrokerError;
use crate::hotstore::{Fields, HotStore};
use crate::keyname::KeyNamer;
use crate::warmstore::{Collection, SystemMeta, WarmStore};

/// A dead-lettered message as returned by `peek_dlq`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEntry {
    pub id: String,
    pub original_msg_id: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
    pub reason: String,
    pub deliveries: u64,
    pub failed_at: String,
}

pub const MAX_DELIVERIES_EXCEEDED: &str = "Max deliveries exceeded";
pub const MANUAL_DEAD_LETTER: &str = "Manual dead-letter";

pub struct DeadLetterSink {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    clock: Arc<dyn WallClock>,
    names: KeyNamer,
    tenant: String,
    max_stream_len: u64,
}

impl DeadLetterSink {
    pub fn new(
        hot: Arc<dyn HotStore>,
        warm: Arc<dyn WarmStore>,
        clock: Arc<dyn WallClock>,
        names: KeyNamer,
        tenant: impl Into<String>,
        max_stream_len: u64,
    ) -> Self {
        Self { hot, warm, clock, names, tenant: tenant.into(), max_stream_len }
    }

    #[instrument(skip(self, payload_json, headers_json), fields(topic = %topic, original_msg_id = %original_msg_id, reason = %reason))]
    pub async fn send_to_dead_letter(
        &self,
        topic: &str,
        original_msg_id: &str,
        payload_json: &str,
        headers_json: &str,
        reason: &str,
        deliveries: u64,
    ) -> Result<String, BrokerError> {
        let failed_at = self.clock.now_iso();
        let mut fields: Fields = HashMap::new();
        fields.insert("originalMsgId".to_string(), original_msg_id.to_string());
        fields.insert("payload".to_string(), payload_json.to_string());
        fields.insert("headers".to_string(), headers_json.to_string());
        fields.insert("reason".to_string(), reason.to_string());
        fields.insert("deliveries".to_string(), deliveries.to_string());
        fields.insert("failedAt".to_string(), failed_at.clone());

        let log = self.names.dlq_log(topic);
        let id = self.hot.log_append(&log, fields, self.max_stream_len).await?;

        let payload: Value = decode_payload(&id, payload_json)?;
        let headers: HashMap<String, String> = decode_headers(&id, headers_json)?;
        let doc = serde_json::json!({
            "topic": topic,
            "msgId": original_msg_id,
            "tenant": self.tenant,
            "reason": reason,
            "headers": headers,
            "payload": payload,
            "failedAt": failed_at,
            "deliveries": deliveries,
            "_system": SystemMeta { created_at: failed_at.clone(), updated_at: None, retention_days: None, tombstone: None, deleted_at: None },
        });
        self.warm.insert(Collection::DeadLetters, doc).await?;
        Ok(id)
    }

    pub async fn dlq_length(&self, topic: &str) -> Result<u64, BrokerError> {
        let log = self.names.dlq_log(topic);
        Ok(self.hot.log_len(&log).await?)
    }

    #[instrument(skip(self), fields(topic = %topic, limit = limit))]
    pub async fn peek_dlq(&self, topic: &str, limit: u64) -> Result<Vec<DeadLetterEntry>, BrokerError> {
        let log = self.names.dlq_log(topic);
        let entries = self.hot.log_range(&log, "-", "+", limit).await?;

        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload_json = entry.fields.get("payload").cloned().unwrap_or_default();
            let headers_json = entry.fields.get("headers").cloned().unwrap_or_default();
            let payload = decode_payload(&entry.id, &payload_json)?;
            let headers = decode_headers(&entry.id, &headers_json)?;
            let deliveries = entry.fields.get("deliveries").and_then(|s| s.parse().ok()).unwrap_or(0);
            result.push(DeadLetterEntry {
                id: entry.id.clone(),
                original_msg_id: entry.fields.get("originalMsgId").cloned().unwrap_or_default(),
                payload,
                headers,
                reason: entry.fields.get("reason").cloned().unwrap_or_default(),
                deliveries,
                failed_at: entry.fields.get("failedAt").cloned().unwrap_or_default(),
            });
        }
        Ok(result)
    }

    pub async fn purge_dlq(&self, topic: &str) -> Result<(), BrokerError> {
        let log = self.names.dlq_log(topic);
        self.hot.kv_del(&[log]).await?;
        Ok(())
    }
}
