//! Scheduler: promotes due notifications from the store onto the delivery queue.
//!
//! Every `poll_interval` the store is asked for active notifications whose
//! `fire_at` is at most `window` away (overdue ones included) and each is
//! published. Nothing marks a notification as queued, so one that is still
//! `active` on the next tick is published again. Workers that lag behind by a
//! tick or more will therefore see duplicates; an explicit claim state written
//! before publishing would close that gap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use herald_common::error::AppError;

use crate::queue::DeliveryQueue;
use crate::store::NotificationStore;

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between two readiness scans.
    pub poll_interval: Duration,
    /// How far ahead of `fire_at` a notification becomes eligible.
    pub window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            window: Duration::from_secs(30),
        }
    }
}

/// Polling scheduler.
pub struct Scheduler {
    store: Arc<dyn NotificationStore>,
    queue: Arc<dyn DeliveryQueue>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queue: Arc<dyn DeliveryQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// The first scan happens immediately. A store failure, or a publish that
    /// exhausted its retries, stops the loop and is returned to the caller.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.config.poll_interval.is_zero(),
            "Scheduler poll interval must be greater than zero"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            window_ms = self.config.window.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Scheduler stopped");
                return Err(e.into());
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// One scan-and-publish pass. Returns how many notifications were published.
    pub async fn tick(&self) -> Result<usize, AppError> {
        let ready = self.store.get_ready(self.config.window).await?;

        if ready.is_empty() {
            tracing::debug!("No notifications ready");
            return Ok(0);
        }

        for notification in &ready {
            self.queue.publish(notification).await?;
            tracing::info!(
                id = notification.id,
                fire_at = notification.fire_at,
                "Notification enqueued"
            );
        }

        tracing::info!(published = ready.len(), "Scheduler tick complete");
        Ok(ready.len())
    }
}
