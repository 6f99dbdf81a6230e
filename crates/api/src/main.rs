//! Herald server binary: HTTP API, scheduler and dispatch workers in one process.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::create_pool;
use herald_common::redis_pool::create_redis_pool;
use herald_engine::cache::RedisStatusCache;
use herald_engine::queue::RedisDeliveryQueue;
use herald_engine::scheduler::{Scheduler, SchedulerConfig};
use herald_engine::service::NotificationService;
use herald_engine::store::PgNotificationStore;
use herald_notifier::sender::TelegramSender;
use herald_notifier::worker::{DispatchWorkerPool, Dispatcher};

use herald_api::background::spawn_scheduler;
use herald_api::routes::create_router;
use herald_api::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "herald_api=debug,herald_engine=info,herald_notifier=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting Herald...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Database
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Redis: one multiplexed manager for cache and publishing, the client for BLPOP
    let (redis_client, redis) = create_redis_pool(&config.redis_url).await?;

    let store = Arc::new(PgNotificationStore::new(pool));
    let cache = Arc::new(RedisStatusCache::new(redis.clone(), config.status_cache_ttl()));
    let queue = Arc::new(RedisDeliveryQueue::new(
        redis_client,
        redis,
        &config.queue_name,
        config.queue_retry_policy(),
    ));
    let sender = Arc::new(TelegramSender::new(
        &config.telegram_api_url,
        &config.telegram_bot_token,
        config.sender_timeout(),
    )?);

    let notifications = NotificationService::new(store.clone(), cache.clone());
    if config.status_cache_warm_on_start {
        notifications.warm_cache().await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Scheduler: a failure stops only this loop
    let scheduler = Scheduler::new(
        store.clone(),
        queue.clone(),
        SchedulerConfig {
            poll_interval: config.scheduler_poll_interval(),
            window: config.scheduler_window(),
        },
    );
    let scheduler_task = spawn_scheduler(scheduler, shutdown_rx.clone());

    // Dispatch workers
    let workers = DispatchWorkerPool::new(
        Dispatcher::new(store, cache, sender),
        config.dispatch_workers,
    );
    let workers_task = {
        let queue = queue.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { workers.run(queue.as_ref(), shutdown_rx).await })
    };

    // OS signals flip the shared shutdown flag
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signals");
            }
            let _ = shutdown_tx.send(true);
        });
    }

    // HTTP API
    let app = create_router(AppState::new(notifications))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("API server listening on {}", config.http_addr);

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    tracing::info!("API server stopped, waiting for background tasks");

    let scheduler_result = scheduler_task.await?;
    workers_task.await??;
    // reported only now, after the signal-driven shutdown
    scheduler_result?;

    tracing::info!("Herald stopped");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        let mut terminate = unix_signal(SignalKind::terminate())?;
        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("Ctrl+C received"),
            _ = terminate.recv() => tracing::info!("SIGTERM received"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Ctrl+C received");
        Ok(())
    }
}
