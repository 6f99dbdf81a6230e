//! Delivery queue: decouples "notification is due" from "notification is sent".
//!
//! The Redis implementation keeps the backlog in a list: the scheduler `RPUSH`es
//! JSON payloads, a pump task `BLPOP`s them and hands the raw bytes to the
//! dispatch workers over a bounded channel. Popping removes the message from
//! Redis, so a message is acknowledged before any worker sees it. A worker that
//! fails mid-delivery loses that message; it is never redelivered.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::{mpsc, watch};

use herald_common::error::AppError;
use herald_common::retry::RetryPolicy;
use herald_common::types::Notification;

/// How long a single `BLPOP` blocks before the pump re-checks shutdown.
const POP_TIMEOUT_SECS: f64 = 1.0;

/// Pause after a Redis error inside the pump before trying again.
const PUMP_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Transport between the scheduler and the dispatch workers.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Serialize and enqueue a notification, retrying per the queue's policy.
    async fn publish(&self, notification: &Notification) -> Result<(), AppError>;

    /// Start consuming raw message bodies.
    ///
    /// Messages are acknowledged before they are yielded. The receiver closes
    /// once `shutdown` flips to `true` or the transport goes away.
    async fn consume(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, AppError>;
}

/// Redis list-backed delivery queue.
#[derive(Clone)]
pub struct RedisDeliveryQueue {
    client: redis::Client,
    redis: ConnectionManager,
    key: String,
    retry: RetryPolicy,
}

impl RedisDeliveryQueue {
    pub fn new(
        client: redis::Client,
        redis: ConnectionManager,
        queue_name: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            redis,
            key: format!("queue:{}", queue_name),
            retry,
        }
    }
}

#[async_trait]
impl DeliveryQueue for RedisDeliveryQueue {
    async fn publish(&self, notification: &Notification) -> Result<(), AppError> {
        let body = serde_json::to_vec(notification)?;

        self.retry
            .run("queue_publish", || {
                let mut redis = self.redis.clone();
                let body = body.clone();
                let key = self.key.clone();
                async move {
                    redis
                        .rpush::<_, _, ()>(key, body)
                        .await
                        .map_err(|e| AppError::Queue(format!("Publish failed: {}", e)))
                }
            })
            .await?;

        tracing::debug!(id = notification.id, queue = %self.key, "Notification published");
        Ok(())
    }

    async fn consume(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, AppError> {
        // BLPOP parks the connection, so it must not share the multiplexed manager.
        let client = self.client.clone();
        let mut conn = client.get_multiplexed_async_connection().await?;
        let key = self.key.clone();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            tracing::info!(queue = %key, "Queue consumer started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                // Not raced against shutdown: dropping an in-flight BLPOP could
                // pop a message whose reply is then discarded.
                let popped: Option<(String, Vec<u8>)> = match conn.blpop(&key, POP_TIMEOUT_SECS).await {
                    Ok(popped) => popped,
                    Err(e) => {
                        tracing::warn!(queue = %key, error = %e, "Queue pop failed, reconnecting");
                        tokio::time::sleep(PUMP_ERROR_PAUSE).await;
                        // a multiplexed connection never heals itself once its socket is gone
                        match client.get_multiplexed_async_connection().await {
                            Ok(fresh) => conn = fresh,
                            Err(e) => {
                                tracing::warn!(queue = %key, error = %e, "Queue reconnect failed");
                            }
                        }
                        continue;
                    }
                };

                let Some((_, body)) = popped else {
                    continue;
                };

                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::warn!(queue = %key, "Shutdown with an acknowledged message in hand, dropping it");
                        break;
                    }
                    sent = tx.send(body) => {
                        if sent.is_err() {
                            // every worker is gone
                            break;
                        }
                    }
                }
            }

            tracing::info!(queue = %key, "Queue consumer stopped");
        });

        Ok(rx)
    }
}
