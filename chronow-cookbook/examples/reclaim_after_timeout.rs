//! Scenario 4: an in-flight entry is reclaimed once its visibility timeout
//! has passed and a dead consumer never acked it.
use chronow_cookbook::{in_memory_broker, sensible_subscription};
use chronow_core::PublishOptions;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let (broker, clock) = in_memory_broker();

    broker.ensure_subscription("orders", "fraud", sensible_subscription()).await.unwrap();
    broker.publish("orders", &serde_json::json!({"id": "D"}), &PublishOptions::default()).await.unwrap();

    let dying_consumer = broker.consume("orders", "fraud", Some("consumer-1".to_string())).await.unwrap();
    let first = dying_consumer.poll().await.unwrap();
    assert_eq!(first.len(), 1);
    // consumer-1 dies here without acking.

    clock.advance(1_500);
    let replacement = broker.consume("orders", "fraud", Some("consumer-2".to_string())).await.unwrap();
    let reclaimed = replacement.poll().await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, first[0].id);
    reclaimed[0].ack().await.unwrap();

    println!("reclaimed {} after visibility timeout", reclaimed[0].id);
}
