//! Ready-to-use recipes ("cookbook") for wiring up a `chronow_core::Broker`.
//! Each function returns something you can drop straight into an example or
//! a small service. The goal is pragmatic defaults that match the six
//! end-to-end scenarios the broker is tested against.
//!
//! **Ladder:**
//! - Simple: [`in_memory_broker`], [`sensible_subscription`]
//! - Intermediate: [`fast_retry_subscription`]
//! - Advanced: [`strict_subscription`]

use std::sync::Arc;

use chronow_core::{
    Broker, BrokerConfig, FrozenWallClock, HotStoreBackend, SubscriptionConfig, WallClock,
};
use chronow_core::testkit::{InMemoryHotStore, InMemoryWarmStore};

/// An all-in-memory broker: no real Redis/Mongo connection, suitable for
/// demos, examples, and tests that want broker semantics without a backend.
pub fn in_memory_broker() -> (Broker, Arc<FrozenWallClock>) {
    let clock = Arc::new(FrozenWallClock::at(1_700_000_000_000));
    let wall_clock: Arc<dyn WallClock> = clock.clone();
    let hot = Arc::new(InMemoryHotStore::new(wall_clock.clone()));
    let warm = Arc::new(InMemoryWarmStore::new());
    let config = BrokerConfig::new(
        HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost/chronow_demo".to_string() },
        "mongodb://localhost/chronow_demo",
    );
    (Broker::new(hot, warm, wall_clock, &config), clock)
}

/// A forgiving default: three deliveries, a one-second visibility timeout,
/// and a gentle backoff ladder. Good starting point for most topics.
pub fn sensible_subscription() -> SubscriptionConfig {
    SubscriptionConfig {
        visibility_timeout_ms: 1_000,
        max_deliveries: 3,
        retry_backoff_ms: vec![100, 200, 400],
        dead_letter_enabled: true,
        shard_count: 1,
        block_ms: 1_000,
        count_per_read: 10,
        created_at: String::new(),
    }
}

/// Tighter retry ladder for latency-sensitive consumers that would rather
/// dead-letter quickly than hold a slot open.
pub fn fast_retry_subscription() -> SubscriptionConfig {
    SubscriptionConfig {
        visibility_timeout_ms: 500,
        max_deliveries: 2,
        retry_backoff_ms: vec![25, 50],
        dead_letter_enabled: true,
        shard_count: 1,
        block_ms: 200,
        count_per_read: 20,
        created_at: String::new(),
    }
}

/// A subscription that never gives up on its own: high delivery budget, long
/// backoff tail, for work where dead-lettering is genuinely a last resort.
pub fn strict_subscription() -> SubscriptionConfig {
    SubscriptionConfig {
        visibility_timeout_ms: 30_000,
        max_deliveries: 10,
        retry_backoff_ms: vec![1_000, 5_000, 15_000, 30_000],
        dead_letter_enabled: true,
        shard_count: 1,
        block_ms: 2_000,
        count_per_read: 5,
        created_at: String::new(),
    }
}
