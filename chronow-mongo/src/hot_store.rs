//! Emulated hot-tier backend (C3): the same `HotStore` contract as
//! `chronow-redis`, provided over three MongoDB collections (`kv`, `streams`,
//! `groups`) by polling instead of native stream primitives.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use chronow_core::{Fields, HotStore, HotStoreError, LogInfo, PendingEntry, StreamEntry, StreamId};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, Database};
use tracing::instrument;

fn map_err(err: mongodb::error::Error) -> HotStoreError {
    HotStoreError::Transient(err.to_string())
}

fn now_ms() -> i64 {
    DateTime::now().timestamp_millis()
}

/// `chronow_core::HotStore` emulated over a dedicated hot-tier Mongo database.
#[derive(Clone)]
pub struct MongoHotStore {
    kv: Collection<Document>,
    streams: Collection<Document>,
    groups: Collection<Document>,
}

impl MongoHotStore {
    #[instrument(skip(uri))]
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, HotStoreError> {
        let client = Client::with_uri_str(uri).await.map_err(|e| HotStoreError::ConnectFailed(e.to_string()))?;
        Ok(Self::from_database(client.database(db_name)))
    }

    /// Wrap an already-open database handle (for callers sharing one client
    /// across the hot and warm tiers).
    pub fn from_database(db: Database) -> Self {
        Self { kv: db.collection("kv"), streams: db.collection("streams"), groups: db.collection("groups") }
    }
}

fn fields_to_document(fields: &Fields) -> Document {
    let mut doc = Document::new();
    for (k, v) in fields {
        doc.insert(k.clone(), v.clone());
    }
    doc
}

pub(crate) fn document_to_fields(doc: &Document) -> Fields {
    doc.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect()
}

#[async_trait]
impl HotStore for MongoHotStore {
    #[instrument(skip(self, value), fields(key = %key))]
    async fn kv_set(&self, key: &str, value: Vec<u8>, ttl_sec: Option<u64>) -> Result<(), HotStoreError> {
        let expires_at = ttl_sec.map(|ttl| Bson::DateTime(DateTime::from_millis(now_ms() + ttl as i64 * 1000)));
        let mut set = doc! { "value": Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: value }), "type": "string" };
        match expires_at {
            Some(exp) => {
                set.insert("expiresAt", exp);
            }
            None => {
                set.insert("expiresAt", Bson::Null);
            }
        }
        self.kv
            .update_one(doc! { "key": key }, doc! { "$set": set })
            .upsert(true)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, HotStoreError> {
        let filter = doc! {
            "key": key,
            "$or": [ { "expiresAt": Bson::Null }, { "expiresAt": { "$gt": DateTime::from_millis(now_ms()) } } ],
        };
        let found = self.kv.find_one(filter).await.map_err(map_err)?;
        Ok(found.and_then(|d| match d.get("value") {
            Some(Bson::Binary(b)) => Some(b.bytes.clone()),
            _ => None,
        }))
    }

    async fn kv_del(&self, keys: &[String]) -> Result<u64, HotStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        // `keys` mixes plain KV keys with log names here: topic purge reuses
        // this to drop a whole stream, mirroring how Redis DEL removes a key
        // regardless of its data type. Clear all three collections so the
        // emulated backend matches that behaviour.
        let result = self.kv.delete_many(doc! { "key": { "$in": keys } }).await.map_err(map_err)?;
        self.streams.delete_many(doc! { "stream": { "$in": keys } }).await.map_err(map_err)?;
        self.groups.delete_many(doc! { "stream": { "$in": keys } }).await.map_err(map_err)?;
        Ok(result.deleted_count)
    }

    async fn kv_exists(&self, keys: &[String]) -> Result<u64, HotStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let filter = doc! {
            "key": { "$in": keys },
            "$or": [ { "expiresAt": Bson::Null }, { "expiresAt": { "$gt": DateTime::from_millis(now_ms()) } } ],
        };
        self.kv.count_documents(filter).await.map_err(map_err)
    }

    async fn kv_expire(&self, key: &str, ttl_sec: u64) -> Result<bool, HotStoreError> {
        let expires_at = DateTime::from_millis(now_ms() + ttl_sec as i64 * 1000);
        let result = self.kv.update_one(doc! { "key": key }, doc! { "$set": { "expiresAt": expires_at } }).await.map_err(map_err)?;
        Ok(result.matched_count > 0)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), HotStoreError> {
        self.kv
            .update_one(
                doc! { "key": key },
                doc! { "$set": { format!("fields.{field}"): value, "type": "hash" } },
            )
            .upsert(true)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, HotStoreError> {
        let found = self.kv.find_one(doc! { "key": key }).await.map_err(map_err)?;
        Ok(found.and_then(|d| d.get_document("fields").ok().and_then(|f| f.get_str(field).ok().map(str::to_string))))
    }

    #[instrument(skip(self, entry), fields(log = %log))]
    async fn log_append(&self, log: &str, entry: Fields, max_len: u64) -> Result<StreamId, HotStoreError> {
        let timestamp = now_ms();
        let counter_filter = doc! { "key": format!("__seq__:{log}:{timestamp}") };
        let counter = self
            .kv
            .find_one_and_update(
                counter_filter,
                doc! { "$inc": { "seq": 1i64 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_err)?;
        let sequence = counter.and_then(|d| d.get_i64("seq").ok()).unwrap_or(1) - 1;
        let id = format!("{timestamp:013}-{sequence:06}");

        let doc = doc! {
            "stream": log,
            "id": &id,
            "timestamp": timestamp,
            "sequence": sequence,
            "fields": fields_to_document(&entry),
            "pending": Document::new(),
        };
        self.streams.insert_one(doc).await.map_err(map_err)?;

        let length = self.streams.count_documents(doc! { "stream": log }).await.map_err(map_err)?;
        if length > max_len {
            let overflow = (length - max_len) as i64;
            let cursor = self
                .streams
                .find(doc! { "stream": log })
                .sort(doc! { "timestamp": 1, "sequence": 1 })
                .limit(overflow)
                .await
                .map_err(map_err)?;
            let stale: Vec<Document> = futures::TryStreamExt::try_collect(cursor).await.map_err(map_err)?;
            let stale_ids: Vec<Bson> = stale.iter().filter_map(|d| d.get("_id").cloned()).collect();
            if !stale_ids.is_empty() {
                self.streams.delete_many(doc! { "_id": { "$in": stale_ids } }).await.map_err(map_err)?;
            }
        }
        Ok(id)
    }

    async fn group_create(&self, log: &str, group: &str, start_id: &str) -> Result<(), HotStoreError> {
        let result = self.groups.insert_one(doc! { "stream": log, "group": group, "lastId": start_id, "createdAt": DateTime::from_millis(now_ms()) }).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("E11000") => {
                Err(HotStoreError::AlreadyExists { log: log.to_string(), group: group.to_string() })
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn group_destroy(&self, log: &str, group: &str) -> Result<(), HotStoreError> {
        self.groups.delete_one(doc! { "stream": log, "group": group }).await.map_err(map_err)?;
        self.streams
            .update_many(doc! { "stream": log }, doc! { "$unset": { format!("pending.{group}"): "" } })
            .await
            .map_err(map_err)?;
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
        let mut delivered = self.claim_batch(log, group, consumer, count).await?;
        if delivered.is_empty() && block_ms > 0 {
            tokio::time::sleep(Duration::from_millis(block_ms.min(1000))).await;
            delivered = self.claim_batch(log, group, consumer, count).await?;
        }
        Ok(delivered)
    }

    async fn group_ack(&self, log: &str, group: &str, ids: &[StreamId]) -> Result<u64, HotStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .streams
            .update_many(
                doc! { "stream": log, "id": { "$in": ids } },
                doc! { "$unset": { format!("pending.{group}"): "" } },
            )
            .await
            .map_err(map_err)?;
        Ok(result.modified_count)
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
        let cutoff = DateTime::from_millis(now_ms() - min_idle_ms as i64);
        let filter = doc! { "stream": log, format!("pending.{group}.deliveredAt"): { "$lte": cutoff } };
        let cursor = self.streams.find(filter).limit(count as i64).await.map_err(map_err)?;
        let stale: Vec<Document> = futures::TryStreamExt::try_collect(cursor).await.map_err(map_err)?;

        let mut reclaimed = Vec::with_capacity(stale.len());
        for doc in stale {
            let id = doc.get_str("id").unwrap_or_default().to_string();
            let prior_deliveries =
                doc.get_document("pending").ok().and_then(|p| p.get_document(group).ok()).and_then(|g| g.get_i64("deliveries").ok()).unwrap_or(0);
            self.streams
                .update_one(
                    doc! { "stream": log, "id": &id },
                    doc! { "$set": { format!("pending.{group}"): {
                        "consumer": consumer,
                        "deliveredAt": DateTime::from_millis(now_ms()),
                        "deliveries": prior_deliveries + 1,
                    } } },
                )
                .await
                .map_err(map_err)?;
            let fields = doc.get_document("fields").map(document_to_fields).unwrap_or_default();
            reclaimed.push(StreamEntry { id, fields });
        }
        Ok(reclaimed)
    }

    async fn group_pending(&self, log: &str, group: &str, count: u64) -> Result<Vec<PendingEntry>, HotStoreError> {
        let filter = doc! { "stream": log, format!("pending.{group}"): { "$exists": true } };
        let cursor = self.streams.find(filter).limit(count as i64).await.map_err(map_err)?;
        let docs: Vec<Document> = futures::TryStreamExt::try_collect(cursor).await.map_err(map_err)?;
        let now = now_ms();
        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.get_str("id").ok()?.to_string();
                let pending = doc.get_document("pending").ok()?.get_document(group).ok()?.clone();
                let consumer = pending.get_str("consumer").unwrap_or_default().to_string();
                let delivered_at = pending.get_datetime("deliveredAt").map(|d| d.timestamp_millis()).unwrap_or(now);
                let deliveries = pending.get_i64("deliveries").unwrap_or(1) as u64;
                Some(PendingEntry { id, consumer, idle_ms: (now - delivered_at).max(0) as u64, deliveries })
            })
            .collect())
    }

    async fn log_len(&self, log: &str) -> Result<u64, HotStoreError> {
        self.streams.count_documents(doc! { "stream": log }).await.map_err(map_err)
    }

    async fn log_range(&self, log: &str, start: &str, end: &str, count: u64) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut filter = doc! { "stream": log };
        let mut id_bounds = Document::new();
        if start != "-" {
            id_bounds.insert("$gte", start);
        }
        if end != "+" {
            id_bounds.insert("$lte", end);
        }
        if !id_bounds.is_empty() {
            filter.insert("id", id_bounds);
        }
        let cursor = self.streams.find(filter).sort(doc! { "timestamp": 1, "sequence": 1 }).limit(count as i64).await.map_err(map_err)?;
        let docs: Vec<Document> = futures::TryStreamExt::try_collect(cursor).await.map_err(map_err)?;
        Ok(docs
            .into_iter()
            .map(|doc| StreamEntry {
                id: doc.get_str("id").unwrap_or_default().to_string(),
                fields: doc.get_document("fields").map(document_to_fields).unwrap_or_default(),
            })
            .collect())
    }

    async fn log_info(&self, log: &str) -> Result<LogInfo, HotStoreError> {
        let length = self.streams.count_documents(doc! { "stream": log }).await.map_err(map_err)?;
        let groups = self.groups.count_documents(doc! { "stream": log }).await.map_err(map_err)?;
        Ok(LogInfo { length, groups })
    }

    async fn zset_add(&self, key: &str, score: f64, member: String) -> Result<(), HotStoreError> {
        self.kv
            .update_one(
                doc! { "key": key },
                doc! { "$set": { format!("members.{member}"): score, "type": "zset" } },
            )
            .upsert(true)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64, limit: u64) -> Result<Vec<String>, HotStoreError> {
        let found = self.kv.find_one(doc! { "key": key }).await.map_err(map_err)?;
        let Some(members) = found.and_then(|d| d.get_document("members").ok().cloned()) else { return Ok(Vec::new()) };
        let mut scored: Vec<(f64, String)> = members
            .iter()
            .filter_map(|(member, score)| score.as_f64().map(|s| (s, member.clone())))
            .filter(|(score, _)| *score >= min && *score <= max)
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit as usize).map(|(_, member)| member).collect())
    }

    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<u64, HotStoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let found = self.kv.find_one(doc! { "key": key }).await.map_err(map_err)?;
        let existing = found.and_then(|d| d.get_document("members").ok().cloned()).unwrap_or_default();
        let removed = members.iter().filter(|m| existing.contains_key(m.as_str())).count() as u64;
        if removed == 0 {
            return Ok(0);
        }
        let unset: Document = members.iter().map(|m| (format!("members.{m}"), Bson::String(String::new()))).collect();
        self.kv.update_one(doc! { "key": key }, doc! { "$unset": unset }).await.map_err(map_err)?;
        Ok(removed)
    }

    async fn zset_card(&self, key: &str) -> Result<u64, HotStoreError> {
        let found = self.kv.find_one(doc! { "key": key }).await.map_err(map_err)?;
        Ok(found.and_then(|d| d.get_document("members").ok().map(|m| m.len() as u64)).unwrap_or(0))
    }
}

impl MongoHotStore {
    async fn claim_batch(&self, log: &str, group: &str, consumer: &str, count: u64) -> Result<Vec<StreamEntry>, HotStoreError> {
        let mut delivered = Vec::new();
        for _ in 0..count {
            let filter = doc! { "stream": log, format!("pending.{group}"): { "$exists": false } };
            let update = doc! { "$set": { format!("pending.{group}"): {
                "consumer": consumer,
                "deliveredAt": DateTime::from_millis(now_ms()),
                "deliveries": 1i64,
            } } };
            match self
                .streams
                .find_one_and_update(filter, update)
                .sort(doc! { "timestamp": 1, "sequence": 1 })
                .return_document(ReturnDocument::After)
                .await
                .map_err(map_err)?
            {
                Some(doc) => delivered.push(StreamEntry {
                    id: doc.get_str("id").unwrap_or_default().to_string(),
                    fields: doc.get_document("fields").map(document_to_fields).unwrap_or_default(),
                }),
                None => break,
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_to_document_carries_every_entry_as_a_string() {
        let mut fields = Fields::new();
        fields.insert("payload".to_string(), "{}".to_string());
        fields.insert("retryOf".to_string(), "1700000000000-000001".to_string());
        let doc = fields_to_document(&fields);
        assert_eq!(doc.get_str("payload").unwrap(), "{}");
        assert_eq!(doc.get_str("retryOf").unwrap(), "1700000000000-000001");
    }

    #[test]
    fn fields_to_document_then_document_to_fields_round_trips() {
        let mut fields = Fields::new();
        fields.insert("headers".to_string(), "{\"a\":\"b\"}".to_string());
        let doc = fields_to_document(&fields);
        assert_eq!(document_to_fields(&doc), fields);
    }
}
