//! Integration tests for the bounded execution queue.
//!
//! Most tests disable the periodic watcher and drive cycles by hand so the
//! moment a slot is released is deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drain, eventually, ready_job, GatedFactory, TestSpawner};
use prometheus_scan_scheduler::config::ExecutionConfig;
use prometheus_scan_scheduler::core::{
    AuditAction, AuditSink, CancelResult, ExecutionService, InMemoryAuditSink, JobState, JobStore,
    ResilientActionExecutor, RetryConsultant, SchedulerError, StoreError, TaskFactory,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use prometheus_scan_scheduler::infra::InMemoryJobStore;

struct Fixture {
    store: Arc<InMemoryJobStore>,
    factory: Arc<GatedFactory>,
    audit: Arc<InMemoryAuditSink>,
    service: ExecutionService<TestSpawner>,
}

fn fixture(config: ExecutionConfig) -> Fixture {
    let store = Arc::new(InMemoryJobStore::new());
    let factory = GatedFactory::new();
    let audit = Arc::new(InMemoryAuditSink::new(100));
    let service = ExecutionService::new(
        config,
        Arc::clone(&factory) as Arc<dyn TaskFactory>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        TestSpawner,
    )
    .unwrap()
    .with_audit(Arc::clone(&audit) as Arc<dyn AuditSink>);
    Fixture {
        store,
        factory,
        audit,
        service,
    }
}

fn manual(queue_max: usize) -> ExecutionConfig {
    ExecutionConfig {
        queue_max,
        watcher_disabled: true,
        ..ExecutionConfig::default()
    }
}

#[tokio::test]
async fn test_capacity_is_enforced_and_reclaimed_by_watcher() {
    let f = fixture(manual(2));
    let a = ready_job(&f.store, "alpha", "static").await;
    let b = ready_job(&f.store, "beta", "static").await;
    let c = ready_job(&f.store, "gamma", "static").await;

    f.service.add_to_execution_queue(&a).await.unwrap();
    f.service.add_to_execution_queue(&b).await.unwrap();
    assert!(f.service.is_queue_full());
    assert!(matches!(
        f.service.add_to_execution_queue(&c).await,
        Err(SchedulerError::QueueFull { in_queue: 2, queue_max: 2 })
    ));

    f.factory.open_gate();
    assert_eq!(drain(&f.service, 2).await, 2);
    assert!(!f.service.is_queue_full());
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Done);
    assert_eq!(f.store.get(b.id).unwrap().state, JobState::Done);

    f.service.add_to_execution_queue(&c).await.unwrap();
    assert_eq!(f.store.get(c.id).unwrap().state, JobState::Queued);
}

#[tokio::test]
async fn test_rejected_admission_creates_no_task() {
    let f = fixture(manual(1));
    let a = ready_job(&f.store, "alpha", "static").await;
    let b = ready_job(&f.store, "beta", "static").await;

    f.service.add_to_execution_queue(&a).await.unwrap();
    assert!(f.service.add_to_execution_queue(&b).await.is_err());
    assert_eq!(f.factory.created(), 1);
    assert_eq!(f.store.get(b.id).unwrap().state, JobState::ReadyToStart);
}

#[tokio::test]
async fn test_zero_capacity_rejects_everything() {
    let f = fixture(manual(0));
    let a = ready_job(&f.store, "alpha", "static").await;
    assert!(f.service.is_queue_full());
    assert!(matches!(
        f.service.add_to_execution_queue(&a).await,
        Err(SchedulerError::QueueFull { .. })
    ));
    assert_eq!(f.service.execution_status().jobs_in_queue, 0);
}

#[tokio::test]
async fn test_capacity_is_not_reclaimed_without_watcher() {
    let f = fixture(manual(1));
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.factory.open_gate();

    assert!(eventually(|| f.factory.started() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(f.service.is_queue_full());
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Running);
}

#[tokio::test]
async fn test_cancel_running_task_is_idempotent() {
    let f = fixture(manual(3));
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    assert!(eventually(|| f.factory.started() == 1).await);

    assert_eq!(f.service.cancel(a.id), CancelResult::CancelRequested);
    assert_eq!(f.service.cancel(a.id), CancelResult::CancelRequested);
    assert_eq!(drain(&f.service, 1).await, 1);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Canceled);

    // done entries stay visible until the next watcher cycle
    let status = f.service.execution_status();
    assert_eq!(status.jobs_in_queue, 1);
    assert!(status.entries[0].done && status.entries[0].canceled);
    assert_eq!(f.service.cancel(a.id), CancelResult::AlreadyDone);

    f.service.run_watcher_cycle().await;
    assert_eq!(f.service.execution_status().jobs_in_queue, 0);
    assert_eq!(f.service.cancel(a.id), CancelResult::NotFound);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Canceled);
}

#[tokio::test]
async fn test_cancel_of_finished_job_changes_nothing() {
    let f = fixture(manual(3));
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.factory.open_gate();
    assert_eq!(drain(&f.service, 1).await, 1);

    assert_eq!(f.service.cancel(a.id), CancelResult::AlreadyDone);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Done);
    assert!(!f.audit.actions_for(a.id).contains(&AuditAction::Cancel));
}

#[tokio::test]
async fn test_failing_task_is_persisted_as_failed() {
    let f = fixture(manual(3));
    let a = ready_job(&f.store, "fail-alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.factory.open_gate();
    assert_eq!(drain(&f.service, 1).await, 1);

    let job = f.store.get(a.id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.ended_at_ms.is_some());
    assert_eq!(
        f.audit.actions_for(a.id),
        vec![AuditAction::Queue, AuditAction::Start, AuditAction::Failed]
    );
}

#[tokio::test]
async fn test_panicking_task_is_persisted_as_failed() {
    let f = fixture(manual(3));
    let a = ready_job(&f.store, "panic-alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.factory.open_gate();
    assert_eq!(drain(&f.service, 1).await, 1);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn test_task_creation_failure_is_reported() {
    let f = fixture(manual(3));
    let a = ready_job(&f.store, "broken-alpha", "static").await;
    assert!(matches!(
        f.service.add_to_execution_queue(&a).await,
        Err(SchedulerError::TaskCreation { job_id, .. }) if job_id == a.id
    ));
    assert!(!f.service.is_queue_full());
}

#[tokio::test]
async fn test_slot_is_released_even_if_terminal_state_cannot_be_persisted() {
    let f = fixture(manual(1));
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    assert!(eventually(|| f.factory.started() == 1).await);
    f.factory.open_gate();
    tokio::time::sleep(Duration::from_millis(20)).await;

    f.store.inject_failures(1);
    assert_eq!(f.service.run_watcher_cycle().await, 1);
    assert!(!f.service.is_queue_full());
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Running);
}

#[tokio::test]
async fn test_periodic_watcher_releases_slots() {
    let f = fixture(ExecutionConfig {
        queue_max: 1,
        watcher_interval_ms: 20,
        watcher_initial_delay_ms: 0,
        watcher_disabled: false,
        ..ExecutionConfig::default()
    });
    f.service.start_watcher();
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.factory.open_gate();

    assert!(eventually(|| f.store.get(a.id).unwrap().state == JobState::Done).await);
    assert!(eventually(|| !f.service.is_queue_full()).await);
    f.service.stop_watcher();
}

#[tokio::test]
async fn test_shutdown_suspends_unfinished_jobs() {
    let f = fixture(manual(5));
    let a = ready_job(&f.store, "alpha", "static").await;
    let b = ready_job(&f.store, "beta", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.service.add_to_execution_queue(&b).await.unwrap();
    assert!(eventually(|| f.factory.started() == 2).await);

    assert_eq!(f.service.shutdown().await.unwrap(), 2);
    for id in [a.id, b.id] {
        let job = f.store.get(id).unwrap();
        assert_eq!(job.state, JobState::Suspended);
        assert!(job.ended_at_ms.is_some());
        assert!(f.audit.actions_for(id).contains(&AuditAction::Suspend));
    }

    let c = ready_job(&f.store, "gamma", "static").await;
    assert!(matches!(
        f.service.add_to_execution_queue(&c).await,
        Err(SchedulerError::Shutdown)
    ));
    assert_eq!(f.service.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_status_snapshot_serializes() {
    let f = fixture(manual(4));
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();

    let status = f.service.execution_status();
    assert_eq!(status.queue_max, 4);
    assert_eq!(status.entries[0].job_id, a.id);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["jobs_in_queue"], 1);
    assert_eq!(json["entries"][0]["done"], false);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retried_queued_write_ends_canceled() {
    let store = Arc::new(InMemoryJobStore::new());
    let factory = GatedFactory::new();
    let service = Arc::new(
        ExecutionService::new(
            manual(2),
            Arc::clone(&factory) as Arc<dyn TaskFactory>,
            Arc::clone(&store) as Arc<dyn JobStore>,
            TestSpawner,
        )
        .unwrap()
        .with_resilience(ResilientActionExecutor::new().with_consultant(
            RetryConsultant::new(1, Duration::from_millis(50)).when(StoreError::is_transient),
        )),
    );
    let a = ready_job(&store, "alpha", "static").await;

    store.inject_failures(1);
    let admission = tokio::spawn({
        let service = Arc::clone(&service);
        let job = a.clone();
        async move { service.add_to_execution_queue(&job).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(service.cancel(a.id), CancelResult::CanceledBeforeStart);
    // QUEUED is still being retried: nothing may be persisted yet
    assert_eq!(service.run_watcher_cycle().await, 0);

    admission.await.unwrap().unwrap();
    assert_eq!(store.get(a.id).unwrap().state, JobState::Queued);
    assert_eq!(service.run_watcher_cycle().await, 1);
    assert_eq!(store.get(a.id).unwrap().state, JobState::Canceled);

    service.run_watcher_cycle().await;
    assert_eq!(service.execution_status().jobs_in_queue, 0);
    assert_eq!(store.get(a.id).unwrap().state, JobState::Canceled);
    assert_eq!(factory.started(), 0);
}

#[tokio::test]
async fn test_shutdown_before_worker_starts_keeps_job_suspended() {
    let f = fixture(manual(3));
    let a = ready_job(&f.store, "alpha", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();

    // current-thread runtime: the worker has not been polled yet
    assert_eq!(f.service.shutdown().await.unwrap(), 1);
    f.factory.open_gate();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Suspended);
    assert_eq!(f.factory.started(), 0);
}

#[tokio::test]
async fn test_shutdown_suspends_jobs_waiting_for_a_worker() {
    let f = fixture(ExecutionConfig {
        worker_count: 1,
        ..manual(3)
    });
    let a = ready_job(&f.store, "alpha", "static").await;
    let b = ready_job(&f.store, "beta", "static").await;
    f.service.add_to_execution_queue(&a).await.unwrap();
    f.service.add_to_execution_queue(&b).await.unwrap();
    assert!(eventually(|| f.factory.started() == 1).await);

    assert_eq!(f.service.shutdown().await.unwrap(), 2);
    f.factory.open_gate();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(f.factory.started(), 1);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Suspended);
    assert_eq!(f.store.get(b.id).unwrap().state, JobState::Suspended);
}

#[tokio::test]
async fn test_jobs_beyond_worker_count_wait_as_queued() {
    let f = fixture(ExecutionConfig {
        worker_count: 1,
        ..manual(3)
    });
    let a = ready_job(&f.store, "alpha", "static").await;
    let b = ready_job(&f.store, "beta", "static").await;
    let c = ready_job(&f.store, "gamma", "static").await;
    for job in [&a, &b, &c] {
        f.service.add_to_execution_queue(job).await.unwrap();
    }
    assert!(eventually(|| f.factory.started() == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(f.factory.started(), 1);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Running);
    assert_eq!(f.store.get(b.id).unwrap().state, JobState::Queued);
    assert_eq!(f.service.cancel(b.id), CancelResult::CanceledBeforeStart);

    f.factory.open_gate();
    assert_eq!(drain(&f.service, 3).await, 3);
    assert_eq!(f.store.get(a.id).unwrap().state, JobState::Done);
    assert_eq!(f.store.get(b.id).unwrap().state, JobState::Canceled);
    assert_eq!(f.store.get(c.id).unwrap().state, JobState::Done);
    assert_eq!(f.factory.started(), 2);
}

#[tokio::test]
async fn test_capacity_holds_for_random_admit_cancel_complete_sequences() {
    const QUEUE_MAX: usize = 3;

    for seed in 0..6_u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let f = fixture(ExecutionConfig {
            worker_count: 2,
            ..manual(QUEUE_MAX)
        });
        let mut admitted = Vec::new();

        for step in 0..40 {
            match rng.random_range(0..4) {
                0 | 1 => {
                    let project = format!("p{seed}-{step}");
                    let job = ready_job(&f.store, &project, "static").await;
                    let full = f.service.is_queue_full();
                    match f.service.add_to_execution_queue(&job).await {
                        Ok(()) => {
                            assert!(!full, "seed {seed} step {step}: admitted into a full queue");
                            admitted.push(job.id);
                        }
                        Err(SchedulerError::QueueFull { .. }) => assert!(full),
                        Err(e) => panic!("seed {seed} step {step}: unexpected error {e}"),
                    }
                }
                2 if !admitted.is_empty() => {
                    let id = admitted[rng.random_range(0..admitted.len())];
                    f.service.cancel(id);
                }
                _ => {
                    f.service.run_watcher_cycle().await;
                }
            }
            if step == 25 {
                f.factory.open_gate();
            }
            tokio::task::yield_now().await;

            let live = f.service.execution_status().entries.iter().filter(|e| !e.done).count();
            assert!(live <= QUEUE_MAX, "seed {seed} step {step}: {live} live entries");
        }

        f.factory.open_gate();
        let settled = || {
            admitted
                .iter()
                .all(|id| f.store.get(*id).is_some_and(|job| job.state.is_terminal()))
        };
        for _ in 0..200 {
            f.service.run_watcher_cycle().await;
            if settled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled(), "seed {seed}: admitted jobs did not all finish");
        assert!(!f.service.is_queue_full());
    }
}
