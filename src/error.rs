//! Error types for the broker and its store abstractions.

use thiserror::Error;

/// Errors produced by the hot-tier store (C1) and its backends.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HotStoreError {
    /// The consumer group already exists for this log (raised by `groupCreate`).
    #[error("consumer group {group} already exists on log {log}")]
    AlreadyExists { log: String, group: String },
    /// Any other backend failure (network, protocol, serialization at the store boundary).
    #[error("transient hot-store error: {0}")]
    Transient(String),
    /// The backend refused to connect within its startup window.
    #[error("hot store connect failed: {0}")]
    ConnectFailed(String),
}

/// Errors produced by the warm-tier (durable) store (C4).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WarmStoreError {
    /// A unique-index violation or similar write conflict.
    #[error("warm store write conflict: {0}")]
    Conflict(String),
    /// Any other backend failure.
    #[error("transient warm-store error: {0}")]
    Transient(String),
    #[error("warm store connect failed: {0}")]
    ConnectFailed(String),
}

/// Unified error type surfaced by the broker's public operations (spec §7).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokerError {
    /// Missing or contradictory configuration; fatal at init.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Hot-store or warm-store unreachable; fatal at init, retryable at runtime.
    #[error("store connect failed: {0}")]
    ConnectFailed(String),

    /// A publish would exceed the configured payload bound.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// A consumer was started against a subscription that has no durable config.
    #[error("subscription {subscription} not found on topic {topic}")]
    SubscriptionNotFound { topic: String, subscription: String },

    /// A log entry's payload or headers could not be decoded.
    #[error("failed to parse entry {id}: {reason}")]
    ParseError { id: String, reason: String },

    /// Any other store failure; the consumer loop logs and retries next iteration,
    /// but callers of one-shot operations (publish, ack, nack) see it directly.
    #[error("transient store error: {0}")]
    TransientStoreError(String),
}

impl From<HotStoreError> for BrokerError {
    fn from(err: HotStoreError) -> Self {
        match err {
            HotStoreError::AlreadyExists { log, group } => {
                // Callers that reach the broker layer should already have swallowed
                // `already-exists` (Topic Manager does); if one leaks through, it is
                // a transient condition from the broker's point of view.
                BrokerError::TransientStoreError(format!(
                    "unexpected already-exists for group {group} on log {log}"
                ))
            }
            HotStoreError::Transient(msg) => BrokerError::TransientStoreError(msg),
            HotStoreError::ConnectFailed(msg) => BrokerError::ConnectFailed(msg),
        }
    }
}

impl From<WarmStoreError> for BrokerError {
    fn from(err: WarmStoreError) -> Self {
        match err {
            WarmStoreError::Conflict(msg) => BrokerError::TransientStoreError(msg),
            WarmStoreError::Transient(msg) => BrokerError::TransientStoreError(msg),
            WarmStoreError::ConnectFailed(msg) => BrokerError::ConnectFailed(msg),
        }
    }
}
