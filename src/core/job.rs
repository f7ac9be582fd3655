//! Job record model shared by the store, the resolver and the execution queue.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, immutable job identifier.
pub type JobId = Uuid;

/// Identifies the cryptographic key generation a job payload was sealed with.
pub type EncryptionPoolId = i64;

/// Persisted job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created by intake, not yet approved.
    Created,
    /// Approved and waiting to be claimed.
    ReadyToStart,
    /// Claimed by a scheduler instance.
    Started,
    /// Admitted into an execution queue.
    Queued,
    /// Worker task is executing.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Failed,
    /// Canceled before or during execution.
    Canceled,
    /// Owning instance terminated mid-execution; eligible for resume.
    Suspended,
}

impl JobState {
    /// Claimed by some instance and not yet finished.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::Started | Self::Queued | Self::Running)
    }

    /// Terminal state; `ended_at_ms` is set when a job enters one.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::ReadyToStart => "READY_TO_START",
            Self::Started => "STARTED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Suspended => "SUSPENDED",
        };
        f.write_str(s)
    }
}

/// A scan job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Current state.
    pub state: JobState,
    /// Grouping key for one-scan-per-project policies.
    pub project_key: String,
    /// Finer grouping inside a project.
    pub module_group_key: String,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Set once, by the instance whose claim succeeded.
    pub started_at_ms: Option<u128>,
    /// Set when the job ends or is suspended.
    pub ended_at_ms: Option<u128>,
    /// Key generation required to decrypt the job payload.
    pub encryption_pool_id: EncryptionPoolId,
    /// Optimistic concurrency counter.
    pub version: u64,
}

impl Job {
    /// New job in `READY_TO_START`, version 0.
    pub fn ready(
        project_key: impl Into<String>,
        module_group_key: impl Into<String>,
        encryption_pool_id: EncryptionPoolId,
        created_at_ms: u128,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::ReadyToStart,
            project_key: project_key.into(),
            module_group_key: module_group_key.into(),
            created_at_ms,
            started_at_ms: None,
            ended_at_ms: None,
            encryption_pool_id,
            version: 0,
        }
    }

    /// Builder-style state override, mostly for fixtures.
    #[must_use]
    pub const fn with_state(mut self, state: JobState) -> Self {
        self.state = state;
        self
    }
}
