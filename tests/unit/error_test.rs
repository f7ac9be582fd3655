//! Tests for error types

use prometheus_scan_scheduler::core::{JobId, SchedulerError, StoreError};

#[test]
fn test_queue_full_message() {
    let err = SchedulerError::QueueFull {
        in_queue: 5,
        queue_max: 5,
    };
    assert_eq!(err.to_string(), "queue full: 5/5");
}

#[test]
fn test_store_error_converts() {
    let err: SchedulerError = StoreError::Unavailable("connection reset".into()).into();
    assert!(matches!(err, SchedulerError::Store(StoreError::Unavailable(_))));
    assert!(err.to_string().contains("connection reset"));
}

#[test]
fn test_store_error_classification() {
    assert!(StoreError::Unavailable("timeout".into()).is_transient());
    assert!(!StoreError::Backend("constraint violated".into()).is_transient());
    assert!(!StoreError::NotFound(JobId::nil()).is_transient());
}

#[test]
fn test_scheduler_error_into_anyhow() {
    let err = anyhow::Error::from(SchedulerError::Shutdown);
    assert_eq!(err.to_string(), "scheduler has been shut down");
}
