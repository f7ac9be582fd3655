//! API-facing response models for an admin surface.

use serde::{Deserialize, Serialize};

use crate::core::{CancelResult, ExecutionService, ExecutionStatus, JobId, Spawn};

/// Response to an admin cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Job the request was for.
    pub job_id: JobId,
    /// What the execution queue did.
    pub result: CancelResult,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// The service still accepts work, i.e. it has not been shut down.
    pub ok: bool,
    /// Whether the queue currently rejects admissions.
    pub queue_full: bool,
}

/// Cancel a job and wrap the outcome for the admin API.
pub fn cancel_job<S: Spawn>(service: &ExecutionService<S>, job_id: JobId) -> CancelResponse {
    CancelResponse {
        job_id,
        result: service.cancel(job_id),
    }
}

/// Current execution queue snapshot.
#[must_use]
pub fn execution_status<S: Spawn>(service: &ExecutionService<S>) -> ExecutionStatus {
    service.execution_status()
}

/// Render the execution queue snapshot as JSON.
///
/// # Errors
///
/// Propagates serialization failures.
pub fn execution_status_json<S: Spawn>(
    service: &ExecutionService<S>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&service.execution_status())
}

/// Return a health payload.
pub fn health<S: Spawn>(service: &ExecutionService<S>) -> Health {
    Health {
        ok: !service.is_shut_down(),
        queue_full: service.is_queue_full(),
    }
}
