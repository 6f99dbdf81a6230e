//! Status cache: Redis-backed read accelerator for notification status.
//!
//! Entries are plain strings (`active`, `completed`, `canceled`) stored under
//! `notification:status:{id}` with a fixed TTL. A missing key is reported as
//! `Ok(None)` so callers can tell a miss apart from Redis being unavailable.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use herald_common::error::AppError;
use herald_common::types::NotificationStatus;

/// Key → status mapping with expiry.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Cached status, `Ok(None)` on a miss.
    async fn get(&self, id: i64) -> Result<Option<NotificationStatus>, AppError>;

    /// Store a status with the cache's configured TTL.
    async fn set(&self, id: i64, status: NotificationStatus) -> Result<(), AppError>;
}

pub fn status_key(id: i64) -> String {
    format!("notification:status:{}", id)
}

/// Redis implementation using `GET` and `SET EX`.
#[derive(Clone)]
pub struct RedisStatusCache {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisStatusCache {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl StatusCache for RedisStatusCache {
    async fn get(&self, id: i64) -> Result<Option<NotificationStatus>, AppError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(status_key(id)).await?;

        raw.map(|value| value.parse::<NotificationStatus>())
            .transpose()
    }

    async fn set(&self, id: i64, status: NotificationStatus) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        // SET EX rejects a zero TTL
        let ttl_secs = self.ttl.as_secs().max(1);

        redis
            .set_ex::<_, _, ()>(status_key(id), status.as_str(), ttl_secs)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_key_format() {
        assert_eq!(status_key(42), "notification:status:42");
    }
}
