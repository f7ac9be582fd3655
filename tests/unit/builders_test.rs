//! Tests for builder modules

use std::sync::Arc;

use anyhow::anyhow;
use prometheus_scan_scheduler::builders::build_engine;
use prometheus_scan_scheduler::config::EngineConfig;
use prometheus_scan_scheduler::core::{
    AppResult, Job, JobStore, ScanTask, SchedulerError, SchedulerStrategy, StaticPoolProvider,
    TaskFactory,
};
use prometheus_scan_scheduler::infra::InMemoryJobStore;
use prometheus_scan_scheduler::runtime::TokioSpawner;

fn no_tasks() -> Arc<dyn TaskFactory> {
    Arc::new(|job: &Job| -> AppResult<Arc<dyn ScanTask>> {
        Err(anyhow!("no task for {}", job.id))
    })
}

#[tokio::test]
async fn test_build_engine_applies_configuration() {
    let mut cfg = EngineConfig::default();
    cfg.execution.queue_max = 7;
    cfg.resolver.strategy = SchedulerStrategy::OneScanPerProjectAndModuleGroup;

    let engine = build_engine(
        &cfg,
        Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>,
        Arc::new(StaticPoolProvider::new([0])),
        no_tasks(),
        TokioSpawner::current().unwrap(),
        None,
    )
    .unwrap();
    assert_eq!(engine.execution.queue_max(), 7);
    assert!(engine.trigger.is_job_processing_enabled());
}

#[tokio::test]
async fn test_build_engine_rejects_invalid_configuration() {
    let mut cfg = EngineConfig::default();
    cfg.trigger.delay_ms = 0;

    let result = build_engine(
        &cfg,
        Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>,
        Arc::new(StaticPoolProvider::new([0])),
        no_tasks(),
        TokioSpawner::current().unwrap(),
        None,
    );
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(msg)) if msg.contains("delay_ms")));
}
