//! In-memory store, cache and queue.
//!
//! Behave like the Postgres/Redis adapters (same not-found, miss, TTL and
//! acknowledge-before-yield semantics) so the whole pipeline can run inside one
//! process. Each adapter counts its calls and can be told to fail, which is
//! what the pipeline tests lean on.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::time::Instant;

use herald_common::error::AppError;
use herald_common::retry::RetryPolicy;
use herald_common::types::{NewNotification, Notification, NotificationStatus};

use crate::cache::StatusCache;
use crate::queue::DeliveryQueue;
use crate::store::NotificationStore;

// ============================================================
// Store
// ============================================================

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<i64, Notification>,
    last_id: i64,
}

/// Notification store backed by a `BTreeMap`.
#[derive(Default)]
pub struct MemoryNotificationStore {
    state: Mutex<StoreState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    get_by_id_calls: AtomicUsize,
    get_ready_calls: AtomicUsize,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row verbatim, keeping its id. Useful for seeding overdue or terminal rows.
    pub async fn insert(&self, notification: Notification) {
        let mut state = self.state.lock().await;
        state.last_id = state.last_id.max(notification.id);
        state.rows.insert(notification.id, notification);
    }

    /// Current status of a row without counting as a read.
    pub async fn status_of(&self, id: i64) -> Option<NotificationStatus> {
        self.state.lock().await.rows.get(&id).map(|n| n.status)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get_by_id_calls(&self) -> usize {
        self.get_by_id_calls.load(Ordering::SeqCst)
    }

    pub fn get_ready_calls(&self) -> usize {
        self.get_ready_calls.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<(), AppError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Internal("store unavailable".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, AppError> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        state.last_id += 1;

        let notification = Notification {
            id: state.last_id,
            text: new.text.clone(),
            recipient: new.recipient.clone(),
            fire_at: new.fire_at,
            status: NotificationStatus::Active,
            created_at: Utc::now(),
        };
        state.rows.insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn get_by_id(&self, id: i64) -> Result<Notification, AppError> {
        self.get_by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        self.state
            .lock()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::notification_not_found(id))
    }

    async fn get_all(&self) -> Result<Vec<Notification>, AppError> {
        self.check_reads()?;
        Ok(self.state.lock().await.rows.values().cloned().collect())
    }

    async fn get_ready(&self, window: Duration) -> Result<Vec<Notification>, AppError> {
        self.get_ready_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;

        let now = Utc::now();
        let window_ms = window.as_millis() as i64;
        let mut ready: Vec<Notification> = self
            .state
            .lock()
            .await
            .rows
            .values()
            .filter(|n| n.status == NotificationStatus::Active)
            .filter(|n| n.millis_until_fire(now) <= window_ms)
            .cloned()
            .collect();
        ready.sort_by_key(|n| n.fire_at);
        Ok(ready)
    }

    async fn update_status(&self, id: i64, status: NotificationStatus) -> Result<(), AppError> {
        self.check_writes()?;
        match self.state.lock().await.rows.get_mut(&id) {
            Some(row) => {
                row.status = status;
                Ok(())
            }
            None => Err(AppError::notification_not_found(id)),
        }
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), AppError> {
        self.check_writes()?;
        self.state
            .lock()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::notification_not_found(id))
    }
}

// ============================================================
// Cache
// ============================================================

/// Status cache with per-entry expiry on the tokio clock.
pub struct MemoryStatusCache {
    entries: Mutex<HashMap<i64, (NotificationStatus, Instant)>>,
    ttl: Duration,
    fail: AtomicBool,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
}

impl MemoryStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            fail: AtomicBool::new(false),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
        }
    }

    /// Drop an entry, as if it had expired.
    pub async fn evict(&self, id: i64) {
        self.entries.lock().await.remove(&id);
    }

    /// Live entry without counting as a read.
    pub async fn peek(&self, id: i64) -> Option<NotificationStatus> {
        self.entries
            .lock()
            .await
            .get(&id)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(status, _)| *status)
    }

    /// Make every call fail with a non-miss error.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Internal("cache unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusCache for MemoryStatusCache {
    async fn get(&self, id: i64) -> Result<Option<NotificationStatus>, AppError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let mut entries = self.entries.lock().await;
        let entry = entries
            .get(&id)
            .map(|(status, expires_at)| (*status, Instant::now() < *expires_at));

        match entry {
            Some((status, true)) => Ok(Some(status)),
            Some((_, false)) => {
                entries.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, id: i64, status: NotificationStatus) -> Result<(), AppError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.entries
            .lock()
            .await
            .insert(id, (status, Instant::now() + self.ttl));
        Ok(())
    }
}

// ============================================================
// Queue
// ============================================================

#[derive(Default)]
struct QueueInner {
    pending: Mutex<VecDeque<Vec<u8>>>,
    published: Mutex<Vec<Notification>>,
    notify: Notify,
    failing_publishes: AtomicU32,
}

/// FIFO delivery queue. Every successful publish is also recorded for inspection.
#[derive(Clone)]
pub struct MemoryDeliveryQueue {
    inner: Arc<QueueInner>,
    retry: RetryPolicy,
}

impl MemoryDeliveryQueue {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner::default()),
            retry,
        }
    }

    /// Fail the next `attempts` publish attempts (retries included).
    pub fn fail_next_publishes(&self, attempts: u32) {
        self.inner.failing_publishes.store(attempts, Ordering::SeqCst);
    }

    /// Enqueue raw bytes without serialization or retry.
    pub async fn push_raw(&self, body: Vec<u8>) {
        self.inner.pending.lock().await.push_back(body);
        self.inner.notify.notify_one();
    }

    /// Messages not yet handed to a consumer.
    pub async fn pending(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Take every pending message without going through a consumer.
    pub async fn drain(&self) -> Vec<Vec<u8>> {
        self.inner.pending.lock().await.drain(..).collect()
    }

    /// Every notification successfully published so far, in order.
    pub async fn published(&self) -> Vec<Notification> {
        self.inner.published.lock().await.clone()
    }

    pub async fn published_ids(&self) -> Vec<i64> {
        self.published().await.iter().map(|n| n.id).collect()
    }
}

#[async_trait]
impl DeliveryQueue for MemoryDeliveryQueue {
    async fn publish(&self, notification: &Notification) -> Result<(), AppError> {
        let body = serde_json::to_vec(notification)?;

        self.retry
            .run("queue_publish", || {
                let inner = Arc::clone(&self.inner);
                let body = body.clone();
                async move {
                    let failing = inner.failing_publishes.load(Ordering::SeqCst);
                    if failing > 0 {
                        inner.failing_publishes.store(failing - 1, Ordering::SeqCst);
                        return Err(AppError::Queue("broker unavailable".to_string()));
                    }
                    inner.pending.lock().await.push_back(body);
                    inner.notify.notify_one();
                    Ok(())
                }
            })
            .await?;

        self.inner.published.lock().await.push(notification.clone());
        Ok(())
    }

    async fn consume(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, AppError> {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let next = inner.pending.lock().await.pop_front();
                match next {
                    Some(body) => {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            sent = tx.send(body) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = inner.notify.notified() => {}
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_notification(fire_at: i64) -> NewNotification {
        NewNotification {
            text: "hello".to_string(),
            recipient: "42".to_string(),
            fire_at,
        }
    }

    #[tokio::test]
    async fn test_store_assigns_increasing_ids() {
        let store = MemoryNotificationStore::new();
        let a = store.create(&new_notification(1)).await.unwrap();
        let b = store.create(&new_notification(2)).await.unwrap();
        assert_eq!(a.id + 1, b.id);
        assert_eq!(a.status, NotificationStatus::Active);
    }

    #[tokio::test]
    async fn test_store_update_missing_is_not_found() {
        let store = MemoryNotificationStore::new();
        let err = store
            .update_status(99, NotificationStatus::Canceled)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires() {
        let cache = MemoryStatusCache::new(Duration::from_secs(10));
        cache.set(1, NotificationStatus::Active).await.unwrap();
        assert_eq!(cache.get(1).await.unwrap(), Some(NotificationStatus::Active));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queue_consumer_stops_on_shutdown() {
        let queue = MemoryDeliveryQueue::new(RetryPolicy::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut rx = queue.consume(shutdown_rx).await.unwrap();

        queue.push_raw(b"first".to_vec()).await;
        assert_eq!(rx.recv().await.unwrap(), b"first".to_vec());

        shutdown_tx.send(true).unwrap();
        assert!(rx.recv().await.is_none());
    }
}
