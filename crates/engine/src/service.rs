//! Notification service: the synchronous operations behind the HTTP API.
//!
//! Owns the cache-aside policy:
//! - create writes the store, then primes the cache with `active`
//! - status writes go to the store first, then the cache
//! - status reads try the cache and fall back to the store only on a miss,
//!   without repopulating the cache

use std::sync::Arc;

use chrono::Utc;

use herald_common::error::AppError;
use herald_common::types::{
    NewNotification, Notification, NotificationStatus, NotificationStatusView,
};

use crate::cache::StatusCache;
use crate::store::NotificationStore;

/// Telegram rejects messages longer than this many characters.
const MAX_TEXT_CHARS: usize = 4096;

/// Service layer for creating, cancelling and inspecting notifications.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    cache: Arc<dyn StatusCache>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, cache: Arc<dyn StatusCache>) -> Self {
        Self { store, cache }
    }

    /// Validate and persist a new notification, then prime its cache entry.
    ///
    /// A cache failure fails the whole call even though the row is already stored.
    pub async fn create(&self, new: NewNotification) -> Result<Notification, AppError> {
        Self::validate(&new, Utc::now().timestamp_millis())?;

        let notification = self.store.create(&new).await?;
        self.cache.set(notification.id, notification.status).await?;

        tracing::info!(
            id = notification.id,
            fire_at = notification.fire_at,
            "Notification scheduled"
        );

        Ok(notification)
    }

    /// All notifications, straight from the store.
    pub async fn list(&self) -> Result<Vec<Notification>, AppError> {
        self.store.get_all().await
    }

    /// Current status of a notification.
    ///
    /// Only a cache miss falls through to the store; any other cache error is returned.
    pub async fn get_status(&self, id: i64) -> Result<NotificationStatusView, AppError> {
        if let Some(status) = self.cache.get(id).await? {
            return Ok(NotificationStatusView { id, status });
        }

        tracing::debug!(id, "Status cache miss, reading from store");
        let notification = self.store.get_by_id(id).await?;

        Ok(NotificationStatusView {
            id,
            status: notification.status,
        })
    }

    /// Cancel a notification that has not been delivered yet.
    ///
    /// Cancelling an already canceled notification succeeds; cancelling a
    /// completed one is a `Conflict`.
    pub async fn cancel(&self, id: i64) -> Result<NotificationStatusView, AppError> {
        let current = self.store.get_by_id(id).await?.status;
        let next = NotificationStatus::Canceled;

        if !current.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "Notification {} is already {} and cannot be canceled",
                id, current
            )));
        }

        self.update_status(id, next).await?;
        tracing::info!(id, "Notification canceled");

        Ok(NotificationStatusView { id, status: next })
    }

    /// Write a status to the store, then to the cache.
    ///
    /// If the store write fails the cache is left untouched, so the cache never
    /// reports a status the store does not hold.
    pub async fn update_status(&self, id: i64, status: NotificationStatus) -> Result<(), AppError> {
        self.store.update_status(id, status).await?;
        self.cache.set(id, status).await?;
        Ok(())
    }

    /// Prime the cache with the stored status of every notification.
    ///
    /// Returns the number of entries written.
    pub async fn warm_cache(&self) -> Result<usize, AppError> {
        let notifications = self.store.get_all().await?;

        for notification in &notifications {
            self.cache.set(notification.id, notification.status).await?;
        }

        tracing::info!(count = notifications.len(), "Status cache warmed");
        Ok(notifications.len())
    }

    fn validate(new: &NewNotification, now_ms: i64) -> Result<(), AppError> {
        if new.text.trim().is_empty() {
            return Err(AppError::Validation("text must not be empty".to_string()));
        }
        if new.text.chars().count() > MAX_TEXT_CHARS {
            return Err(AppError::Validation(format!(
                "text must be at most {} characters",
                MAX_TEXT_CHARS
            )));
        }
        if new.recipient.trim().is_empty() {
            return Err(AppError::Validation("recipient must not be empty".to_string()));
        }
        if new.fire_at <= now_ms {
            return Err(AppError::Validation(
                "fire_at must be in the future".to_string(),
            ));
        }
        Ok(())
    }
}
