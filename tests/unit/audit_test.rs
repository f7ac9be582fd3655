//! Tests for audit sinks

use std::sync::Arc;

use prometheus_scan_scheduler::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, JobId,
};

#[test]
fn test_in_memory_sink_keeps_events_in_order() {
    let sink = InMemoryAuditSink::new(10);
    let job = JobId::new_v4();
    sink.record(build_audit_event(job, AuditAction::Queue, None));
    sink.record(build_audit_event(job, AuditAction::Cancel, Some("admin".into())));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].action, AuditAction::Cancel);
    assert_eq!(events[1].detail.as_deref(), Some("admin"));
    assert_ne!(events[0].event_id, events[1].event_id);
}

#[test]
fn test_shared_sink_records_through_arc() {
    let sink = Arc::new(InMemoryAuditSink::new(10));
    let as_dyn: Arc<dyn AuditSink> = Arc::clone(&sink) as Arc<dyn AuditSink>;
    let job = JobId::new_v4();
    as_dyn.record(build_audit_event(job, AuditAction::Done, None));
    assert_eq!(sink.actions_for(job), vec![AuditAction::Done]);
    assert!(sink.actions_for(JobId::new_v4()).is_empty());
}

#[test]
fn test_audit_event_serializes() {
    let event = build_audit_event(JobId::nil(), AuditAction::Failed, Some("exit 2".into()));
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "failed");
    assert_eq!(json["job_id"], "00000000-0000-0000-0000-000000000000");
}
