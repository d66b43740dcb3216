//! Codec (C6): JSON encoding, payload size guard, content hashing, and the
//! field-map <-> structured-value conversions used when writing and reading
//! log entries.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BrokerError;
use crate::hotstore::Fields;

/// A payload plus its headers, encoded and ready for `logAppend`.
#[derive(Debug, Clone)]
pub struct EncodedEntry {
    pub payload_json: String,
    pub headers_json: String,
    pub hash: String,
    pub size: usize,
}

/// JSON-encode `payload` and `headers`, enforcing `max_payload_bytes` on the
/// payload's encoded size (spec invariant I6).
pub fn encode(
    payload: &Value,
    headers: &HashMap<String, String>,
    max_payload_bytes: usize,
) -> Result<EncodedEntry, BrokerError> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| BrokerError::ParseError { id: "<publish>".into(), reason: e.to_string() })?;
    let size = payload_json.len();
    if size > max_payload_bytes {
        return Err(BrokerError::PayloadTooLarge { size, max: max_payload_bytes });
    }
    let headers_json = serde_json::to_string(headers)
        .map_err(|e| BrokerError::ParseError { id: "<publish>".into(), reason: e.to_string() })?;
    let hash = content_hash(&payload_json);
    Ok(EncodedEntry { payload_json, headers_json, hash, size })
}

/// `hash:sha256(json)` as a lowercase hex digest.
pub fn content_hash(json: &str) -> String {
    let digest = Sha256::digest(json.as_bytes());
    hex::encode(digest)
}

/// Parse a JSON payload string back into a structured value.
pub fn decode_payload(id: &str, raw: &str) -> Result<Value, BrokerError> {
    serde_json::from_str(raw).map_err(|e| BrokerError::ParseError {
        id: id.to_string(),
        reason: format!("invalid payload json: {e}"),
    })
}

/// Parse a headers JSON string back into a string map.
pub fn decode_headers(id: &str, raw: &str) -> Result<HashMap<String, String>, BrokerError> {
    serde_json::from_str(raw).map_err(|e| BrokerError::ParseError {
        id: id.to_string(),
        reason: format!("invalid headers json: {e}"),
    })
}

/// Serialize any `Serialize` value canonically for storage as a hash/KV field.
pub fn to_json_string<T: Serialize>(value: &T) -> Result<String, BrokerError> {
    serde_json::to_string(value)
        .map_err(|e| BrokerError::ParseError { id: "<encode>".into(), reason: e.to_string() })
}

/// Build a log entry's field map from an already-encoded payload/headers pair.
pub fn entry_fields(encoded: &EncodedEntry, published_at: &str, extra: &[(&str, String)]) -> Fields {
    let mut fields: Fields = HashMap::new();
    fields.insert("payload".to_string(), encoded.payload_json.clone());
    fields.insert("headers".to_string(), encoded.headers_json.clone());
    fields.insert("hash".to_string(), encoded.hash.clone());
    fields.insert("size".to_string(), encoded.size.to_string());
    fields.insert("publishedAt".to_string(), published_at.to_string());
    for (k, v) in extra {
        fields.insert((*k).to_string(), v.clone());
    }
    fields
}
