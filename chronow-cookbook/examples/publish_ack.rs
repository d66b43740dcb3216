//! Scenario 1: publish a message, read it, and acknowledge it.
use chronow_cookbook::{in_memory_broker, sensible_subscription};
use chronow_core::PublishOptions;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let (broker, _clock) = in_memory_broker();

    broker.ensure_subscription("orders", "fraud", sensible_subscription()).await.unwrap();
    broker.publish("orders", &serde_json::json!({"id": "A"}), &PublishOptions::default()).await.unwrap();

    let consumer = broker.consume("orders", "fraud", None).await.unwrap();
    let messages = consumer.poll().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].redelivery_count, 0);
    messages[0].ack().await.unwrap();

    let stats = broker.stats("orders").await.unwrap();
    println!("stats: length={} groups={}", stats.length, stats.groups);
    assert_eq!(broker.dlq_length("orders").await.unwrap(), 0);
}
