//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::job::JobId;
use crate::core::store::StoreError;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Execution queue has no free capacity.
    #[error("queue full: {in_queue}/{queue_max}")]
    QueueFull {
        /// Entries not yet done at the time of rejection.
        in_queue: usize,
        /// Configured capacity.
        queue_max: usize,
    },
    /// The job already has a live entry in the execution queue.
    #[error("job {0} already queued")]
    AlreadyQueued(JobId),
    /// Job record does not exist.
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// Job record store failure (after resilience was exhausted).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The task factory could not build a task for the job.
    #[error("cannot create task for job {job_id}: {reason}")]
    TaskCreation {
        /// Job the task was requested for.
        job_id: JobId,
        /// Factory error rendered as text.
        reason: String,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The service has been shut down.
    #[error("scheduler has been shut down")]
    Shutdown,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
