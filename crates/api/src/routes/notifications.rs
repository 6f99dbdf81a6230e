//! Notification routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::{NewNotification, Notification, NotificationStatusView};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/notify",
            get(list_notifications).post(create_notification),
        )
        .route(
            "/notify/{id}",
            get(get_notification_status).delete(cancel_notification),
        )
}

/// Body of `POST /notify`.
#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub text: String,
    pub recipient: String,
    pub fire_at: DateTime<Utc>,
}

/// POST /notify: schedule a new notification.
async fn create_notification(
    State(state): State<AppState>,
    payload: Result<Json<CreateNotificationRequest>, JsonRejection>,
) -> Result<Json<Notification>, AppError> {
    let Json(request) =
        payload.map_err(|e| AppError::Validation(format!("Invalid payload: {}", e.body_text())))?;

    let notification = state
        .notifications
        .create(NewNotification {
            text: request.text,
            recipient: request.recipient,
            fire_at: request.fire_at.timestamp_millis(),
        })
        .await?;

    Ok(Json(notification))
}

/// GET /notify: list every notification.
async fn list_notifications(
    State(state): State<AppState>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = state.notifications.list().await?;
    Ok(Json(notifications))
}

/// GET /notify/:id: current status of one notification.
async fn get_notification_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NotificationStatusView>, AppError> {
    let view = state.notifications.get_status(parse_id(&id)?).await?;
    Ok(Json(view))
}

/// DELETE /notify/:id: cancel a notification that has not fired yet.
async fn cancel_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NotificationStatusView>, AppError> {
    let view = state.notifications.cancel(parse_id(&id)?).await?;
    Ok(Json(view))
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid notification id: {}", raw)))
}
