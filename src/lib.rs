#![forbid(unsafe_code)]

//! # chronow-core
//!
//! Durable topics and subscriptions over a pluggable hot-tier store:
//! at-least-once delivery, retry with exponential backoff, and a dead-letter
//! queue.
//!
//! ## Components
//!
//! - [`hotstore::HotStore`] — the abstract streaming-log/KV/zset/hash surface
//!   two interchangeable backends implement (`chronow-redis`, `chronow-mongo`).
//! - [`warmstore::WarmStore`] — the durable document store the broker mirrors
//!   into for retention that survives hot-tier trimming.
//! - [`producer::Producer`] / [`consumer::ConsumerLoop`] — publish and
//!   consume messages with visibility-timeout reclaim, bounded retry, and
//!   dead-lettering.
//! - [`broker::Broker`] — the façade tying the above together.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chronow_core::prelude::*;
//!
//! # async fn run(hot: Arc<dyn HotStore>, warm: Arc<dyn WarmStore>) -> Result<(), BrokerError> {
//! let clock: Arc<dyn WallClock> = Arc::new(SystemWallClock);
//! let config = BrokerConfig::new(
//!     HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost".to_string() },
//!     "mongodb://localhost",
//! );
//! let broker = Broker::new(hot, warm, clock, &config);
//!
//! broker.ensure_subscription("orders", "fraud", SubscriptionConfig {
//!     visibility_timeout_ms: 30_000,
//!     max_deliveries: 5,
//!     retry_backoff_ms: vec![1_000, 5_000, 30_000],
//!     dead_letter_enabled: true,
//!     shard_count: 1,
//!     block_ms: 1_000,
//!     count_per_read: 10,
//!     created_at: String::new(),
//! }).await?;
//!
//! let msg_id = broker.publish("orders", &serde_json::json!({"orderId": "A-1"}), &PublishOptions::default()).await?;
//! let consumer = broker.consume("orders", "fraud", None).await?;
//! for message in consumer.poll().await? {
//!     message.ack().await?;
//! }
//! # let _ = msg_id;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod broker;
mod clock;
mod codec;
mod config;
mod consumer;
mod dead_letter;
mod error;
mod hotstore;
mod jitter;
mod keyname;
mod producer;
mod retry_scheduler;
mod shared_memory;
mod topic_manager;
mod warmstore;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-exports
pub use backoff::Backoff;
pub use broker::Broker;
pub use clock::{FrozenWallClock, SystemWallClock, WallClock};
pub use codec::{content_hash, decode_headers, decode_payload, encode, EncodedEntry};
pub use config::{BrokerConfig, HotStoreBackend, RedisConfig, SpaceConfig};
pub use consumer::{ConsumerLoop, Message, NackOptions};
pub use dead_letter::{DeadLetterEntry, DeadLetterSink, MANUAL_DEAD_LETTER, MAX_DELIVERIES_EXCEEDED};
pub use error::{BrokerError, HotStoreError, WarmStoreError};
pub use hotstore::{Fields, HotStore, LogInfo, PendingEntry, StreamEntry, StreamId};
pub use jitter::Jitter;
pub use keyname::{Kind, KeyNamer};
pub use producer::{Producer, PublishOptions};
pub use retry_scheduler::{RetryEntry, RetryScheduler};
pub use shared_memory::{SetOptions, SharedMemoryEngine, UpsertStrategy};
pub use topic_manager::{SubscriptionConfig, TopicManager, TopicStats};
pub use warmstore::{Collection, DeadLetterDoc, Filter, MessageDoc, NullWarmStore, SharedMemoryDoc, SystemMeta, TopicDoc, WarmStore};

pub mod prelude;
