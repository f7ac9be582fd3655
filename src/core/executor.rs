//! Worker task capability and the factory that builds tasks for jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::job::Job;
use crate::core::AppResult;

/// What a scan task reports when it returns normally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The task honored a cancel request and stopped early.
    pub canceled: bool,
    /// Optional human readable result or reason.
    pub message: Option<String>,
}

impl ExecutionResult {
    /// Successful completion with a message.
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            canceled: false,
            message: Some(message.into()),
        }
    }

    /// The task stopped because cancellation was requested.
    #[must_use]
    pub const fn canceled() -> Self {
        Self {
            canceled: true,
            message: None,
        }
    }
}

/// A runnable scan invocation for one job.
///
/// The execution service never kills a task. It only calls
/// [`prepare_for_cancel`](ScanTask::prepare_for_cancel); how the underlying
/// subprocess or connection is interrupted is up to the implementation.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_scan_scheduler::core::{AppResult, ExecutionResult, ScanTask};
///
/// struct ShellScan { cancel: tokio::sync::Notify }
///
/// #[async_trait]
/// impl ScanTask for ShellScan {
///     async fn run(&self) -> AppResult<ExecutionResult> {
///         tokio::select! {
///             _ = run_scanner() => Ok(ExecutionResult::done("scan finished")),
///             _ = self.cancel.notified() => Ok(ExecutionResult::canceled()),
///         }
///     }
///
///     fn prepare_for_cancel(&self, _interrupt_allowed: bool) {
///         self.cancel.notify_one();
///     }
/// }
/// ```
#[async_trait]
pub trait ScanTask: Send + Sync + 'static {
    /// Perform the scan and persist its result. Errors mark the job `FAILED`.
    async fn run(&self) -> AppResult<ExecutionResult>;

    /// Cooperative cancel request; may be called while `run` is in flight.
    fn prepare_for_cancel(&self, interrupt_allowed: bool);
}

/// Builds the [`ScanTask`] for an admitted job.
pub trait TaskFactory: Send + Sync + 'static {
    /// Create the task for `job`.
    ///
    /// # Errors
    ///
    /// Fails when the job cannot be turned into a runnable task.
    fn create_task(&self, job: &Job) -> AppResult<Arc<dyn ScanTask>>;
}

impl<F> TaskFactory for F
where
    F: Fn(&Job) -> AppResult<Arc<dyn ScanTask>> + Send + Sync + 'static,
{
    fn create_task(&self, job: &Job) -> AppResult<Arc<dyn ScanTask>> {
        self(job)
    }
}
