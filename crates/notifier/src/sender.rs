//! Push senders: the last hop of a notification.
//!
//! `TelegramSender` talks to the Bot API `sendMessage` method. A send is a
//! single HTTP call with no retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use herald_common::error::AppError;

/// Delivers a message to an end user.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), AppError>;
}

/// Subset of the Bot API response envelope.
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

/// Telegram Bot API sender.
pub struct TelegramSender {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramSender {
    /// Build a sender whose requests give up after `timeout`.
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

#[async_trait]
impl PushSender for TelegramSender {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.send_message_url())
            .json(&json!({ "chat_id": recipient, "text": text }))
            .send()
            .await
            // the URL carries the bot token
            .map_err(|e| AppError::Delivery(e.without_url().to_string()))?;

        let status = response.status();
        let body: TelegramResponse = response.json().await.map_err(|e| {
            AppError::Delivery(format!(
                "Unreadable Telegram response ({}): {}",
                status,
                e.without_url()
            ))
        })?;

        if !status.is_success() || !body.ok {
            return Err(AppError::Delivery(format!(
                "Telegram rejected message ({}): {}",
                status,
                body.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        tracing::debug!(recipient, "Telegram message sent");
        Ok(())
    }
}

/// In-memory sender that records every delivery and can be told to fail.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    attempts: Mutex<usize>,
    fail: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successful deliveries as `(recipient, text)`.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    /// Every call, successful or not.
    pub async fn attempts(&self) -> usize {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), AppError> {
        *self.attempts.lock().await += 1;

        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Delivery("chat not found".to_string()));
        }

        self.sent
            .lock()
            .await
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}
