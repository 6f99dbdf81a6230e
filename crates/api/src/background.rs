//! Background loops that run next to the HTTP server.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use herald_engine::scheduler::Scheduler;

/// Spawn the scheduler loop.
///
/// A scheduler failure ends only this task. The HTTP server and the dispatch
/// workers keep running on `shutdown`, and the error is handed back when the
/// task is joined.
pub fn spawn_scheduler(
    scheduler: Scheduler,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let result = scheduler.run(shutdown).await;
        if let Err(e) = &result {
            tracing::error!(
                error = %e,
                "Scheduler loop terminated, API and dispatch workers keep running"
            );
        }
        result
    })
}
