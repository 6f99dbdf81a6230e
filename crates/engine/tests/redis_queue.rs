//! Integration tests for the Redis delivery queue.
//!
//! Requires a running Redis server; `REDIS_URL` defaults to localhost.
//! Run with:
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p herald-engine --test redis_queue -- --ignored --nocapture
//! ```

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::{mpsc, watch};

use herald_common::redis_pool::create_redis_pool;
use herald_common::retry::RetryPolicy;
use herald_common::types::{Notification, NotificationStatus};
use herald_engine::queue::{DeliveryQueue, RedisDeliveryQueue};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn notification(id: i64) -> Notification {
    Notification {
        id,
        text: format!("message {}", id),
        recipient: "555".to_string(),
        fire_at: Utc::now().timestamp_millis(),
        status: NotificationStatus::Active,
        created_at: Utc::now(),
    }
}

async fn next_id(rx: &mut mpsc::Receiver<Vec<u8>>) -> i64 {
    let body = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no message within 10s")
        .expect("stream closed");
    serde_json::from_slice::<Notification>(&body).unwrap().id
}

#[tokio::test]
#[ignore]
async fn test_publish_then_consume() {
    let (client, manager) = create_redis_pool(&redis_url()).await.unwrap();
    let name = format!("test-fifo-{}", Utc::now().timestamp_micros());
    let queue = RedisDeliveryQueue::new(client, manager.clone(), &name, RetryPolicy::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    queue.publish(&notification(1)).await.unwrap();
    queue.publish(&notification(2)).await.unwrap();
    let mut rx = queue.consume(shutdown_rx).await.unwrap();

    assert_eq!(next_id(&mut rx).await, 1);
    assert_eq!(next_id(&mut rx).await, 2);

    shutdown_tx.send(true).unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
#[ignore]
async fn test_consumer_reconnects_after_connection_loss() {
    let (client, mut manager) = create_redis_pool(&redis_url()).await.unwrap();
    let name = format!("test-reconnect-{}", Utc::now().timestamp_micros());
    let queue = RedisDeliveryQueue::new(client, manager.clone(), &name, RetryPolicy::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut rx = queue.consume(shutdown_rx).await.unwrap();

    queue.publish(&notification(1)).await.unwrap();
    assert_eq!(next_id(&mut rx).await, 1);

    // drop every other client connection, the consumer's BLPOP connection included
    let killed: i64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("normal")
        .arg("SKIPME")
        .arg("yes")
        .query_async(&mut manager)
        .await
        .unwrap();
    assert!(killed >= 1);

    queue.publish(&notification(2)).await.unwrap();
    assert_eq!(next_id(&mut rx).await, 2);

    let _: () = manager.del(format!("queue:{}", name)).await.unwrap();
}
