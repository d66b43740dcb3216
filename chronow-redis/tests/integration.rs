use std::collections::HashMap;

use chronow_core::HotStore;
use chronow_redis::RedisHotStore;

// Requires Redis running. If CHRONOW_TEST_REDIS_URL is unset, the test skips.
#[tokio::test]
async fn publish_deliver_ack_round_trips_through_a_real_stream() {
    let Some(url) = std::env::var("CHRONOW_TEST_REDIS_URL").ok() else {
        eprintln!("skipping: set CHRONOW_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
        return;
    };
    let store = RedisHotStore::connect(&url).await.expect("connect to redis");

    let log = format!("chronow-redis-test:{}", uuid_like_suffix());
    let group = "fraud";

    store.group_create(&log, group, "0").await.expect("group_create");

    let mut entry = HashMap::new();
    entry.insert("payload".to_string(), "{\"id\":\"A\"}".to_string());
    let id = store.log_append(&log, entry, 1_000).await.expect("log_append");
    assert!(!id.is_empty());

    let delivered = store.group_read(&log, group, "consumer-1", 1_000, 10).await.expect("group_read");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, id);
    assert_eq!(delivered[0].fields.get("payload"), Some(&"{\"id\":\"A\"}".to_string()));

    let acked = store.group_ack(&log, group, &[id]).await.expect("group_ack");
    assert_eq!(acked, 1);

    let info = store.log_info(&log).await.expect("log_info");
    assert_eq!(info.length, 1);
    assert_eq!(info.groups, 1);

    store.group_destroy(&log, group).await.expect("group_destroy");
    store.kv_del(&[log]).await.expect("cleanup");
}

#[tokio::test]
async fn kv_set_get_del_round_trips() {
    let Some(url) = std::env::var("CHRONOW_TEST_REDIS_URL").ok() else {
        eprintln!("skipping: set CHRONOW_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
        return;
    };
    let store = RedisHotStore::connect(&url).await.expect("connect to redis");

    let key = format!("chronow-redis-test-kv:{}", uuid_like_suffix());
    store.kv_set(&key, b"hello".to_vec(), None).await.expect("kv_set");
    assert_eq!(store.kv_get(&key).await.expect("kv_get"), Some(b"hello".to_vec()));
    assert_eq!(store.kv_exists(&[key.clone()]).await.expect("kv_exists"), 1);

    let removed = store.kv_del(&[key.clone()]).await.expect("kv_del");
    assert_eq!(removed, 1);
    assert_eq!(store.kv_get(&key).await.expect("kv_get after del"), None);
}

fn uuid_like_suffix() -> u128 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
}
