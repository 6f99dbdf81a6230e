//! Background task supervision: a failed scheduler must not stop the rest of
//! the process.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tokio::sync::watch;
use tower::ServiceExt;

use herald_api::background::spawn_scheduler;
use herald_api::routes::create_router;
use herald_api::state::AppState;
use herald_common::retry::RetryPolicy;
use herald_common::types::{Notification, NotificationStatus};
use herald_engine::memory::{MemoryDeliveryQueue, MemoryNotificationStore, MemoryStatusCache};
use herald_engine::scheduler::{Scheduler, SchedulerConfig};
use herald_engine::service::NotificationService;
use herald_notifier::sender::RecordingSender;
use herald_notifier::worker::{DispatchWorkerPool, Dispatcher};

#[tokio::test]
async fn test_scheduler_failure_leaves_api_and_workers_running() {
    let store = Arc::new(MemoryNotificationStore::new());
    let cache = Arc::new(MemoryStatusCache::new(Duration::from_secs(3600)));
    let queue = MemoryDeliveryQueue::new(RetryPolicy::default());
    let sender = Arc::new(RecordingSender::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // readiness scans fail, so the scheduler stops on its first tick
    store.set_fail_reads(true);
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(queue.clone()),
        SchedulerConfig::default(),
    );
    let scheduler_task = spawn_scheduler(scheduler, shutdown_rx.clone());

    let pool = DispatchWorkerPool::new(
        Dispatcher::new(store.clone(), cache.clone(), sender.clone()),
        2,
    );
    let workers_task = {
        let queue = queue.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { pool.run(&queue, shutdown_rx).await })
    };

    let scheduler_result = tokio::time::timeout(Duration::from_secs(5), scheduler_task)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(scheduler_result.is_err());
    assert!(!*shutdown_rx.borrow());

    // the HTTP surface still answers
    let router = create_router(AppState::new(NotificationService::new(
        store.clone(),
        cache.clone(),
    )));
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // and the workers still deliver whatever reaches the queue
    let notification = Notification {
        id: 7,
        text: "still here".to_string(),
        recipient: "100".to_string(),
        fire_at: Utc::now().timestamp_millis(),
        status: NotificationStatus::Active,
        created_at: Utc::now(),
    };
    store.insert(notification.clone()).await;
    queue
        .push_raw(serde_json::to_vec(&notification).unwrap())
        .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while sender.sent().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker did not deliver");
    assert!(!workers_task.is_finished());

    shutdown_tx.send(true).unwrap();
    workers_task.await.unwrap().unwrap();
    assert_eq!(store.status_of(7).await, Some(NotificationStatus::Completed));
}
