//! Scenario 3: a message that exhausts its delivery budget lands in the DLQ.
use chronow_cookbook::{in_memory_broker, sensible_subscription};
use chronow_core::{NackOptions, PublishOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let (broker, clock) = in_memory_broker();

    broker.ensure_subscription("orders", "fraud", sensible_subscription()).await.unwrap();
    let original_id = broker
        .publish("orders", &serde_json::json!({"id": "C"}), &PublishOptions::default())
        .await
        .unwrap();

    let consumer = broker.consume("orders", "fraud", None).await.unwrap();

    for expected_redelivery in 0..3u32 {
        let messages = consumer.poll().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].redelivery_count, expected_redelivery);
        messages[0].nack(NackOptions { requeue: true, delay_ms: None }).await.unwrap();
        clock.advance(500);
    }

    assert_eq!(broker.dlq_length("orders").await.unwrap(), 1);
    let entries = broker.peek_dlq("orders", 10).await.unwrap();
    assert_eq!(entries[0].original_msg_id, original_id);
    assert_eq!(entries[0].reason, "Max deliveries exceeded");
    println!("dead-lettered after {} deliveries", entries[0].deliveries);
}
