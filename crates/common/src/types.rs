use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Lifecycle status of a scheduled notification.
///
/// `Active` is the only non-terminal state. `Completed` is reached through a
/// successful dispatch, `Canceled` through an explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationStatus {
    Active,
    Completed,
    Canceled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Active => "active",
            NotificationStatus::Completed => "completed",
            NotificationStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationStatus::Active)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-applying the current status is always allowed so status writes stay
    /// idempotent.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        *self == next || (*self == NotificationStatus::Active && next.is_terminal())
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NotificationStatus::Active),
            "completed" => Ok(NotificationStatus::Completed),
            "canceled" => Ok(NotificationStatus::Canceled),
            other => Err(AppError::Internal(format!(
                "Unknown notification status '{}'",
                other
            ))),
        }
    }
}

/// A scheduled notification as persisted by the store.
///
/// This is also the JSON payload carried on the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub text: String,
    /// Addressing token for the push sender (Telegram chat id or `@channel`).
    pub recipient: String,
    /// Delivery instant as a millisecond Unix epoch.
    pub fire_at: i64,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Milliseconds left until `fire_at`, negative once overdue.
    pub fn millis_until_fire(&self, now: DateTime<Utc>) -> i64 {
        self.fire_at - now.timestamp_millis()
    }
}

/// Input for creating a notification. The store assigns `id`, `status` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub text: String,
    pub recipient: String,
    pub fire_at: i64,
}

/// Result of a status lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStatusView {
    pub id: i64,
    pub status: NotificationStatus,
}
