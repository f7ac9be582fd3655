//! Tests for tokio spawner utilities and admin API helpers

use std::sync::Arc;

use anyhow::anyhow;
use prometheus_scan_scheduler::config::ExecutionConfig;
use prometheus_scan_scheduler::core::{
    AppResult, CancelResult, ExecutionService, Job, JobId, JobStore, ScanTask, Spawn, TaskFactory,
};
use prometheus_scan_scheduler::infra::InMemoryJobStore;
use prometheus_scan_scheduler::runtime::{self, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_tokio_spawner_outside_runtime() {
    assert!(TokioSpawner::current().is_err());
}

#[tokio::test]
async fn test_admin_helpers() {
    let factory: Arc<dyn TaskFactory> = Arc::new(|_: &Job| -> AppResult<Arc<dyn ScanTask>> {
        Err(anyhow!("unused"))
    });
    let service = ExecutionService::new(
        ExecutionConfig::default(),
        factory,
        Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>,
        TokioSpawner::current().unwrap(),
    )
    .unwrap();

    let id = JobId::new_v4();
    let response = runtime::cancel_job(&service, id);
    assert_eq!(response.result, CancelResult::NotFound);
    assert_eq!(
        serde_json::to_value(&response).unwrap()["result"],
        "not_found"
    );

    let json = runtime::execution_status_json(&service).unwrap();
    assert!(json.contains("\"queue_max\":50"));
    assert_eq!(runtime::execution_status(&service).jobs_in_queue, 0);
    let health = runtime::health(&service);
    assert!(health.ok);
    assert!(!health.queue_full);

    service.shutdown().await.unwrap();
    assert!(!runtime::health(&service).ok);
}
