//! Producer (C9): append to a topic log, enforcing payload bounds, with an
//! optional warm copy (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::clock::WallClock;
use crate::codec::{encode, entry_fields};
use crate::error::BrokerError;
use crate::hotstore::HotStore;
use crate::keyname::KeyNamer;
use crate::warmstore::{Collection, SystemMeta, WarmStore};

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub headers: HashMap<String, String>,
    pub persist_warm_copy: bool,
}

pub struct Producer {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    clock: Arc<dyn WallClock>,
    names: KeyNamer,
    tenant: String,
    max_payload_bytes: usize,
    max_stream_len: u64,
}

impl Producer {
    pub fn new(
        hot: Arc<dyn HotStore>,
        warm: Arc<dyn WarmStore>,
        clock: Arc<dyn WallClock>,
        names: KeyNamer,
        tenant: impl Into<String>,
        max_payload_bytes: usize,
        max_stream_len: u64,
    ) -> Self {
        Self { hot, warm, clock, names, tenant: tenant.into(), max_payload_bytes, max_stream_len }
    }

    #[instrument(skip(self, payload, opts), fields(topic = %topic))]
    pub async fn publish(&self, topic: &str, payload: &Value, opts: &PublishOptions) -> Result<String, BrokerError> {
        let encoded = encode(payload, &opts.headers, self.max_payload_bytes)?;
        let published_at = self.clock.now_iso();
        let fields = entry_fields(&encoded, &published_at, &[]);

        let log = self.names.topic_log(topic);
        let msg_id = self.hot.log_append(&log, fields, self.max_stream_len).await?;

        if opts.persist_warm_copy {
            self.warm_insert(topic, &msg_id, &encoded, payload, &opts.headers, &published_at).await?;
        }
        Ok(msg_id)
    }

    /// Publish a batch atomically at the validation level: if any payload
    /// exceeds the bound the whole batch is rejected before anything is
    /// appended. Warm inserts are deferred until every id is known so no
    /// warm row is ever written with a missing `msgId`.
    #[instrument(skip(self, payloads, opts), fields(topic = %topic, count = payloads.len()))]
    pub async fn publish_batch(
        &self,
        topic: &str,
        payloads: &[Value],
        opts: &PublishOptions,
    ) -> Result<Vec<String>, BrokerError> {
        let encoded: Vec<_> = payloads
            .iter()
            .map(|p| encode(p, &opts.headers, self.max_payload_bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let log = self.names.topic_log(topic);
        let published_at = self.clock.now_iso();
        let mut ids = Vec::with_capacity(encoded.len());
        for entry in &encoded {
            let fields = entry_fields(entry, &published_at, &[]);
            ids.push(self.hot.log_append(&log, fields, self.max_stream_len).await?);
        }

        if opts.persist_warm_copy {
            for ((id, payload), entry) in ids.iter().zip(payloads.iter()).zip(encoded.iter()) {
                self.warm_insert(topic, id, entry, payload, &opts.headers, &published_at).await?;
            }
        }
        Ok(ids)
    }

    async fn warm_insert(
        &self,
        topic: &str,
        msg_id: &str,
        encoded: &crate::codec::EncodedEntry,
        payload: &Value,
        headers: &HashMap<String, String>,
        published_at: &str,
    ) -> Result<(), BrokerError> {
        let doc = serde_json::json!({
            "topic": topic,
            "msgId": msg_id,
            "tenant": self.tenant,
            "headers": headers,
            "payload": payload,
            "firstSeenAt": published_at,
            "size": encoded.size,
            "_system": SystemMeta { created_at: published_at.to_string(), updated_at: None, retention_days: None, tombstone: None, deleted_at: None },
        });
        self.warm.insert(Collection::Messages, doc).await?;
        Ok(())
    }
}
