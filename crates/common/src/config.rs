use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string, shared by the status cache and the delivery queue
    pub redis_url: String,

    /// Address the HTTP API binds to (default: 0.0.0.0:8080)
    pub http_addr: String,

    /// Telegram bot token
    pub telegram_bot_token: String,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// Per-request timeout for the push sender in seconds (default: 10)
    pub sender_timeout_secs: u64,

    /// Scheduler poll period in milliseconds (default: 60000)
    pub scheduler_poll_interval_ms: u64,

    /// Firing window in milliseconds: notifications due within this window are enqueued (default: 30000)
    pub scheduler_window_ms: u64,

    /// Number of concurrent dispatch workers (default: 3)
    pub dispatch_workers: usize,

    /// TTL of status cache entries in seconds (default: 86400 = 24h)
    pub status_cache_ttl_secs: u64,

    /// Prime the status cache from the database at startup
    pub status_cache_warm_on_start: bool,

    /// Name of the delivery queue
    pub queue_name: String,

    /// Publish attempts before the scheduler gives up (default: 3)
    pub queue_publish_attempts: u32,

    /// Delay before the first publish retry in milliseconds (default: 1000)
    pub queue_publish_delay_ms: u64,

    /// Multiplicative backoff between publish retries (default: 2)
    pub queue_publish_backoff: f64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            http_addr: std::env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").map_err(|_| {
                anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable is required")
            })?,
            telegram_api_url: std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            sender_timeout_secs: parse_var("SENDER_TIMEOUT_SECS", 10)?,
            scheduler_poll_interval_ms: parse_var("SCHEDULER_POLL_INTERVAL_MS", 60_000)?,
            scheduler_window_ms: parse_var("SCHEDULER_WINDOW_MS", 30_000)?,
            dispatch_workers: parse_var("DISPATCH_WORKERS", 3)?,
            status_cache_ttl_secs: parse_var("STATUS_CACHE_TTL_SECS", 86_400)?,
            status_cache_warm_on_start: parse_var("STATUS_CACHE_WARM_ON_START", false)?,
            queue_name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| "notification".to_string()),
            queue_publish_attempts: parse_var("QUEUE_PUBLISH_ATTEMPTS", 3)?,
            queue_publish_delay_ms: parse_var("QUEUE_PUBLISH_DELAY_MS", 1_000)?,
            queue_publish_backoff: parse_var("QUEUE_PUBLISH_BACKOFF", 2.0)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but would break the pipeline at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler_poll_interval_ms == 0 {
            anyhow::bail!("SCHEDULER_POLL_INTERVAL_MS must be greater than 0");
        }
        if self.sender_timeout_secs == 0 {
            anyhow::bail!("SENDER_TIMEOUT_SECS must be greater than 0");
        }
        if !self.queue_publish_backoff.is_finite() || self.queue_publish_backoff < 1.0 {
            anyhow::bail!(
                "QUEUE_PUBLISH_BACKOFF must be a finite number >= 1, got {}",
                self.queue_publish_backoff
            );
        }
        Ok(())
    }

    pub fn scheduler_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_poll_interval_ms)
    }

    pub fn scheduler_window(&self) -> Duration {
        Duration::from_millis(self.scheduler_window_ms)
    }

    pub fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }

    pub fn sender_timeout(&self) -> Duration {
        Duration::from_secs(self.sender_timeout_secs)
    }

    pub fn queue_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.queue_publish_attempts,
            initial_delay: Duration::from_millis(self.queue_publish_delay_ms),
            backoff: self.queue_publish_backoff,
        }
    }
}

/// Read an optional environment variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("HERALD_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://unused".to_string(),
            db_max_connections: 5,
            redis_url: "redis://localhost:6379".to_string(),
            http_addr: "127.0.0.1:0".to_string(),
            telegram_bot_token: "token".to_string(),
            telegram_api_url: "http://localhost".to_string(),
            sender_timeout_secs: 10,
            scheduler_poll_interval_ms: 60_000,
            scheduler_window_ms: 30_000,
            dispatch_workers: 3,
            status_cache_ttl_secs: 86_400,
            status_cache_warm_on_start: false,
            queue_name: "notification".to_string(),
            queue_publish_attempts: 3,
            queue_publish_delay_ms: 1_000,
            queue_publish_backoff: 2.0,
        }
    }

    #[test]
    fn test_derived_durations() {
        let config = test_config();

        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler_poll_interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler_window(), Duration::from_secs(30));
        assert_eq!(config.status_cache_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.queue_retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let config = AppConfig {
            scheduler_poll_interval_ms: 0,
            ..test_config()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SCHEDULER_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_sender_timeout_is_rejected() {
        let config = AppConfig {
            sender_timeout_secs: 0,
            ..test_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_must_be_finite_and_at_least_one() {
        for backoff in [f64::INFINITY, f64::NAN, 0.5, -2.0] {
            let config = AppConfig {
                queue_publish_backoff: backoff,
                ..test_config()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("QUEUE_PUBLISH_BACKOFF"), "{}", backoff);
        }

        let config = AppConfig {
            queue_publish_backoff: 1.0,
            ..test_config()
        };
        assert!(config.validate().is_ok());
    }
}
