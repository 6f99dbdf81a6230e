//! Dispatch workers: drain the delivery queue and deliver notifications.
//!
//! `K` workers share one consumption stream; whichever is idle takes the next
//! message. Per message:
//! 1. Decode the JSON payload (malformed payloads are dropped)
//! 2. Send it through the push sender (failures are dropped, not retried)
//! 3. Mark it `completed` in the store, then in the cache
//!
//! The queue acknowledged the message before it got here, so every failure
//! above loses that delivery attempt. A notification whose send failed stays
//! `active`.
//!
//! The stored status is not re-read before sending. A notification canceled
//! after it was enqueued is still delivered, and its `canceled` status is then
//! overwritten with `completed`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus};
use herald_engine::cache::StatusCache;
use herald_engine::queue::DeliveryQueue;
use herald_engine::store::NotificationStore;

use crate::sender::PushSender;

/// Why a single message was not fully dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Malformed queue payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Delivery of notification {id} failed: {source}")]
    Delivery { id: i64, source: AppError },

    #[error("Notification {id} delivered but not marked completed in store: {source}")]
    StoreCommit { id: i64, source: AppError },

    #[error("Notification {id} delivered but not marked completed in cache: {source}")]
    CacheCommit { id: i64, source: AppError },
}

/// Processes one queue message end to end.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    cache: Arc<dyn StatusCache>,
    sender: Arc<dyn PushSender>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        cache: Arc<dyn StatusCache>,
        sender: Arc<dyn PushSender>,
    ) -> Self {
        Self {
            store,
            cache,
            sender,
        }
    }

    /// Decode, deliver and commit a single payload.
    pub async fn handle(&self, payload: &[u8]) -> Result<Notification, DispatchError> {
        let notification: Notification = serde_json::from_slice(payload)?;
        let id = notification.id;

        self.sender
            .send(&notification.recipient, &notification.text)
            .await
            .map_err(|source| DispatchError::Delivery { id, source })?;

        // Store before cache; on a store failure the cache keeps saying `active`.
        self.store
            .update_status(id, NotificationStatus::Completed)
            .await
            .map_err(|source| DispatchError::StoreCommit { id, source })?;

        self.cache
            .set(id, NotificationStatus::Completed)
            .await
            .map_err(|source| DispatchError::CacheCommit { id, source })?;

        Ok(Notification {
            status: NotificationStatus::Completed,
            ..notification
        })
    }
}

/// Fixed-size pool of dispatch workers.
pub struct DispatchWorkerPool {
    dispatcher: Arc<Dispatcher>,
    workers: usize,
}

impl DispatchWorkerPool {
    pub fn new(dispatcher: Dispatcher, workers: usize) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            workers: workers.max(1),
        }
    }

    /// Consume `queue` until `shutdown` flips and every worker has finished
    /// its in-flight message.
    pub async fn run(
        &self,
        queue: &dyn DeliveryQueue,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let messages = queue.consume(shutdown).await?;
        self.drain(messages).await;
        Ok(())
    }

    /// Spawn the workers on an existing message stream and wait for it to close.
    pub async fn drain(&self, messages: mpsc::Receiver<Vec<u8>>) {
        let messages = Arc::new(Mutex::new(messages));
        let mut workers = JoinSet::new();

        for index in 0..self.workers {
            workers.spawn(worker_loop(
                index,
                Arc::clone(&self.dispatcher),
                Arc::clone(&messages),
            ));
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch worker panicked");
            }
        }

        tracing::info!("All dispatch workers stopped");
    }
}

async fn worker_loop(
    index: usize,
    dispatcher: Arc<Dispatcher>,
    messages: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
) {
    tracing::info!(worker = index, "Dispatch worker started");

    loop {
        // Holding the lock while waiting hands the next message to exactly one idle worker.
        let next = messages.lock().await.recv().await;
        let Some(payload) = next else {
            break;
        };

        match dispatcher.handle(&payload).await {
            Ok(notification) => {
                tracing::info!(
                    worker = index,
                    id = notification.id,
                    "Notification delivered"
                );
            }
            Err(e) => {
                tracing::error!(worker = index, error = %e, "Dispatch failed");
            }
        }
    }

    tracing::info!(worker = index, "Dispatch worker stopped");
}
