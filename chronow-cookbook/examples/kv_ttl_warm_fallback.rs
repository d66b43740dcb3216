//! Scenario 6: a hot-tier key expires, and a warm-persisted copy keeps
//! serving reads afterward.
use chronow_cookbook::in_memory_broker;
use chronow_core::SetOptions;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let (broker, clock) = in_memory_broker();
    let shared_memory = broker.shared_memory("t1", "ns");

    let value = serde_json::json!({"v": 1});
    let opts = SetOptions { hot_ttl_sec: Some(1), warm_persist: true, ..Default::default() };
    shared_memory.set("k", &value, &opts).await.unwrap();

    let from_hot = shared_memory.get("k").await.unwrap();
    assert_eq!(from_hot, Some(value.clone()));

    clock.advance(2_000);
    let from_warm = shared_memory.get("k").await.unwrap();
    assert_eq!(from_warm, Some(value));

    println!("value survived hot-tier expiry via warm fallback");
}
