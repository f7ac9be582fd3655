//! Audit sink implementations for execution queue lifecycle events.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::job::JobId;
use crate::util::clock::now_ms;

/// Lifecycle step recorded by the execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Admitted into the queue.
    Queue,
    /// Worker task started.
    Start,
    /// Cancellation requested or applied.
    Cancel,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Failed,
    /// Handed back to the store as suspended on shutdown.
    Suspend,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queue => "queue",
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Suspend => "suspend",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related job identifier.
    pub job_id: JobId,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: AuditEvent) {
        (**self).record(event);
    }
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one job, oldest first.
    #[must_use]
    pub fn actions_for(&self, job_id: JobId) -> Vec<AuditAction> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(job_id: JobId, action: AuditAction, detail: Option<String>) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        job_id,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
