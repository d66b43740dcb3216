//! Scenario 5: a payload over the configured limit is rejected before it
//! ever reaches the log.
use std::sync::Arc;

use chronow_core::testkit::{InMemoryHotStore, InMemoryWarmStore};
use chronow_core::{Broker, BrokerConfig, BrokerError, FrozenWallClock, HotStoreBackend, PublishOptions, WallClock};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let clock = Arc::new(FrozenWallClock::at(1_700_000_000_000));
    let wall_clock: Arc<dyn WallClock> = clock.clone();
    let hot = Arc::new(InMemoryHotStore::new(wall_clock.clone()));
    let warm = Arc::new(InMemoryWarmStore::new());
    let mut config = BrokerConfig::new(
        HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost/chronow_demo".to_string() },
        "mongodb://localhost/chronow_demo",
    );
    config.max_payload_bytes = 1024;

    let broker = Broker::new(hot, warm, wall_clock, &config);
    broker.ensure_topic("orders").await.unwrap();

    let oversize_payload = serde_json::json!({ "blob": "x".repeat(2000) });
    let err = broker.publish("orders", &oversize_payload, &PublishOptions::default()).await.unwrap_err();
    assert!(matches!(err, BrokerError::PayloadTooLarge { .. }));

    let stats = broker.stats("orders").await.unwrap();
    assert_eq!(stats.length, 0);
    println!("oversize publish rejected: {err}");
}
