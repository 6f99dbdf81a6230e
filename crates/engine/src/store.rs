//! Notification store: the durable source of truth for every notification.
//!
//! The scheduler reads ready rows from it, the dispatch workers and the
//! notification service write status transitions into it. The cache never
//! writes back here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use herald_common::error::AppError;
use herald_common::types::{NewNotification, Notification, NotificationStatus};

/// Persistent storage for notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new notification in `active` status and return the stored row.
    async fn create(&self, new: &NewNotification) -> Result<Notification, AppError>;

    /// Fetch a notification, or `AppError::NotFound`.
    async fn get_by_id(&self, id: i64) -> Result<Notification, AppError>;

    /// All notifications, oldest first.
    async fn get_all(&self) -> Result<Vec<Notification>, AppError>;

    /// Active notifications with `fire_at - now <= window`.
    ///
    /// Overdue rows have a negative remaining time and are always included.
    async fn get_ready(&self, window: Duration) -> Result<Vec<Notification>, AppError>;

    /// Overwrite the status of a notification, or `AppError::NotFound` when no row matches.
    ///
    /// Writing the status a row already has is not an error.
    async fn update_status(&self, id: i64, status: NotificationStatus) -> Result<(), AppError>;

    /// Remove a notification, or `AppError::NotFound` when no row matches.
    async fn delete_by_id(&self, id: i64) -> Result<(), AppError>;
}

/// PostgreSQL-backed notification store.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            r#"
            INSERT INTO notifications (text, recipient, fire_at, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id, text, recipient, fire_at, status, created_at
            "#,
        )
        .bind(&new.text)
        .bind(&new.recipient)
        .bind(new.fire_at)
        .bind(NotificationStatus::Active)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(id = notification.id, fire_at = notification.fire_at, "Notification stored");
        Ok(notification)
    }

    async fn get_by_id(&self, id: i64) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            "SELECT id, text, recipient, fire_at, status, created_at FROM notifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::notification_not_found(id))?;

        Ok(notification)
    }

    async fn get_all(&self) -> Result<Vec<Notification>, AppError> {
        let notifications: Vec<Notification> = sqlx::query_as(
            "SELECT id, text, recipient, fire_at, status, created_at FROM notifications ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn get_ready(&self, window: Duration) -> Result<Vec<Notification>, AppError> {
        let now_ms = Utc::now().timestamp_millis();

        let notifications: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT id, text, recipient, fire_at, status, created_at
            FROM notifications
            WHERE status = $1
              AND fire_at - $2 <= $3
            ORDER BY fire_at
            "#,
        )
        .bind(NotificationStatus::Active)
        .bind(now_ms)
        .bind(window.as_millis() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn update_status(&self, id: i64, status: NotificationStatus) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE notifications SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::notification_not_found(id));
        }

        tracing::debug!(id, status = %status, "Notification status updated");
        Ok(())
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::notification_not_found(id));
        }

        tracing::info!(id, "Notification deleted");
        Ok(())
    }
}
