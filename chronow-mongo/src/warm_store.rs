//! Durable warm-tier backend (C4): `chronow_core::WarmStore` over four
//! MongoDB collections, one per logical collection the broker writes to.

use async_trait::async_trait;
use bson::Document;
use chronow_core::{Collection, Filter, WarmStore, WarmStoreError};
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Database};
use serde_json::Value;
use tracing::instrument;

fn map_err(err: mongodb::error::Error) -> WarmStoreError {
    if err.to_string().contains("E11000") {
        WarmStoreError::Conflict(err.to_string())
    } else {
        WarmStoreError::Transient(err.to_string())
    }
}

fn json_to_document(value: &Value) -> Result<Document, WarmStoreError> {
    bson::to_document(value).map_err(|e| WarmStoreError::Transient(e.to_string()))
}

fn document_to_json(doc: Document) -> Result<Value, WarmStoreError> {
    bson::from_document(doc).map_err(|e| WarmStoreError::Transient(e.to_string()))
}

fn filter_to_document(filter: &Filter) -> Result<Document, WarmStoreError> {
    let mut doc = Document::new();
    for (k, v) in filter {
        doc.insert(k.clone(), bson::to_bson(v).map_err(|e| WarmStoreError::Transient(e.to_string()))?);
    }
    Ok(doc)
}

/// `chronow_core::WarmStore` over a durable Mongo database.
#[derive(Clone)]
pub struct MongoWarmStore {
    client: Client,
    shared_memory: mongodb::Collection<Document>,
    topics: mongodb::Collection<Document>,
    messages: mongodb::Collection<Document>,
    dead_letters: mongodb::Collection<Document>,
}

impl MongoWarmStore {
    #[instrument(skip(uri))]
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, WarmStoreError> {
        let client = Client::with_uri_str(uri).await.map_err(|e| WarmStoreError::ConnectFailed(e.to_string()))?;
        Ok(Self::from_database(client.clone(), client.database(db_name)))
    }

    pub fn from_database(client: Client, db: Database) -> Self {
        Self {
            client,
            shared_memory: db.collection("shared_memory"),
            topics: db.collection("topics"),
            messages: db.collection("messages"),
            dead_letters: db.collection("dead_letters"),
        }
    }

    fn collection(&self, collection: Collection) -> &mongodb::Collection<Document> {
        match collection {
            Collection::SharedMemory => &self.shared_memory,
            Collection::Topics => &self.topics,
            Collection::Messages => &self.messages,
            Collection::DeadLetters => &self.dead_letters,
        }
    }
}

#[async_trait]
impl WarmStore for MongoWarmStore {
    async fn insert(&self, collection: Collection, doc: Value) -> Result<(), WarmStoreError> {
        let doc = json_to_document(&doc)?;
        self.collection(collection).insert_one(doc).await.map_err(map_err)?;
        Ok(())
    }

    async fn upsert(&self, collection: Collection, filter: Filter, doc: Value) -> Result<(), WarmStoreError> {
        let filter_doc = filter_to_document(&filter)?;
        let replacement = json_to_document(&doc)?;
        self.collection(collection)
            .replace_one(filter_doc, replacement)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn find_one(&self, collection: Collection, filter: Filter) -> Result<Option<Value>, WarmStoreError> {
        let filter_doc = filter_to_document(&filter)?;
        let found = self.collection(collection).find_one(filter_doc).await.map_err(map_err)?;
        found.map(document_to_json).transpose()
    }

    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Value>, WarmStoreError> {
        let filter_doc = filter_to_document(&filter)?;
        let cursor = self.collection(collection).find(filter_doc).await.map_err(map_err)?;
        let docs: Vec<Document> = futures::TryStreamExt::try_collect(cursor).await.map_err(map_err)?;
        docs.into_iter().map(document_to_json).collect()
    }

    async fn delete_many(&self, collection: Collection, filter: Filter) -> Result<u64, WarmStoreError> {
        let filter_doc = filter_to_document(&filter)?;
        let result = self.collection(collection).delete_many(filter_doc).await.map_err(map_err)?;
        Ok(result.deleted_count)
    }

    async fn close(&self) -> Result<(), WarmStoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn json_to_document_then_document_to_json_round_trips() {
        let value = serde_json::json!({ "topic": "orders", "shards": 1, "createdAt": "2026-01-01T00:00:00Z" });
        let doc = json_to_document(&value).unwrap();
        assert_eq!(doc.get_str("topic").unwrap(), "orders");
        assert_eq!(document_to_json(doc).unwrap(), value);
    }

    #[test]
    fn document_to_json_rejects_a_document_that_cannot_deserialize_into_value() {
        // `Value` can represent any BSON document, so there is no failure mode to
        // exercise here beyond confirming a plain document round-trips cleanly.
        let doc = doc! { "msgId": "abc", "deliveries": 3i64 };
        let value = document_to_json(doc).unwrap();
        assert_eq!(value["msgId"], "abc");
        assert_eq!(value["deliveries"], 3);
    }

    #[test]
    fn filter_to_document_converts_every_entry() {
        let mut filter = Filter::new();
        filter.insert("topic".to_string(), serde_json::json!("orders"));
        filter.insert("tenant".to_string(), serde_json::json!("t1"));
        let doc = filter_to_document(&filter).unwrap();
        assert_eq!(doc.get_str("topic").unwrap(), "orders");
        assert_eq!(doc.get_str("tenant").unwrap(), "t1");
    }
}
