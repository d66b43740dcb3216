//! Convenient re-exports for common chronow types.
pub use crate::{
    backoff::Backoff,
    broker::Broker,
    clock::{FrozenWallClock, SystemWallClock, WallClock},
    config::{BrokerConfig, HotStoreBackend, RedisConfig, SpaceConfig},
    consumer::{ConsumerLoop, Message, NackOptions},
    dead_letter::{DeadLetterEntry, DeadLetterSink, MANUAL_DEAD_LETTER, MAX_DELIVERIES_EXCEEDED},
    error::{BrokerError, HotStoreError, WarmStoreError},
    hotstore::{Fields, HotStore, LogInfo, PendingEntry, StreamEntry, StreamId},
    jitter::Jitter,
    keyname::{KeyNamer, Kind},
    producer::{Producer, PublishOptions},
    retry_scheduler::{RetryEntry, RetryScheduler},
    shared_memory::{SetOptions, SharedMemoryEngine, UpsertStrategy},
    topic_manager::{SubscriptionConfig, TopicManager, TopicStats},
    warmstore::{Collection, NullWarmStore, WarmStore},
};
