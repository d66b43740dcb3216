//! Scenario 2: a nack{requeue:true} is redelivered within one backoff window.
use chronow_cookbook::{in_memory_broker, sensible_subscription};
use chronow_core::{NackOptions, PublishOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let (broker, clock) = in_memory_broker();

    broker.ensure_subscription("orders", "fraud", sensible_subscription()).await.unwrap();
    let original_id = broker
        .publish("orders", &serde_json::json!({"id": "B"}), &PublishOptions::default())
        .await
        .unwrap();

    let consumer = broker.consume("orders", "fraud", None).await.unwrap();
    let first = consumer.poll().await.unwrap();
    assert_eq!(first[0].redelivery_count, 0);
    first[0].nack(NackOptions { requeue: true, delay_ms: None }).await.unwrap();

    // First backoff entry is 100ms; advance the clock past it plus jitter headroom.
    clock.advance(130);
    let retried = consumer.poll().await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].headers.get("retryOf"), Some(&original_id));
    retried[0].ack().await.unwrap();

    assert_eq!(broker.dlq_length("orders").await.unwrap(), 0);
    println!("retried delivery acked after {}ms", 130);
}
