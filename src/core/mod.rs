//! Core scheduling abstractions: job model, store contract, resilience,
//! execution queue and next-job resolution.

pub mod audit;
pub mod error;
pub mod execution;
pub mod executor;
pub mod job;
pub mod resilience;
pub mod scheduler;
pub mod store;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, SchedulerError};
pub use execution::{CancelResult, ExecutionEntryStatus, ExecutionService, ExecutionStatus, Spawn};
pub use executor::{ExecutionResult, ScanTask, TaskFactory};
pub use job::{EncryptionPoolId, Job, JobId, JobState};
pub use resilience::{
    FallthroughConsultant, ResilienceCallback, ResilienceConsultant, ResilienceContext,
    ResilienceProposal, ResilientActionExecutor, RetryConsultant,
};
pub use scheduler::{
    EncryptionPoolProvider, SchedulerNextJobResolver, SchedulerStrategy, SchedulerTrigger,
    StaticPoolProvider, TriggerHandle, TriggerOutcome,
};
pub use store::{JobStore, RunningExclusion, StoreError};
