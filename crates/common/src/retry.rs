//! Bounded retry with multiplicative backoff.
//!
//! Used by the delivery queue adapters to wrap a publish: the first attempt runs
//! immediately, each following attempt waits `initial_delay * backoff^(n-1)`.
//! With the defaults (3 attempts, 1s, x2) a publish is tried at 0s, 1s and 3s
//! before the last error is returned.

use std::future::Future;
use std::time::Duration;

/// Retry strategy for queue publishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed retry.
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff.max(1.0).powi(exponent);
        // saturate instead of panicking on overflow
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        operation,
                        attempts,
                        error = %e,
                        "All attempts failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_saturates_on_overflow() {
        let policy = RetryPolicy {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            backoff: f64::INFINITY,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::MAX);

        let policy = RetryPolicy {
            backoff: 1e300,
            ..policy
        };
        assert_eq!(policy.delay_for(3), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), String> = RetryPolicy::default()
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("broker down".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "broker down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff between the three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let calls = &AtomicU32::new(0);

        let result: Result<u32, String> = RetryPolicy::default()
            .run("test", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 { Err(format!("fail {}", n)) } else { Ok(n) }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 0,
            initial_delay: Duration::ZERO,
            backoff: 2.0,
        };

        let result: Result<(), &str> = policy
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
