//! Job record store abstraction.
//!
//! The store is the only state shared between scheduler instances. Every
//! cross-instance decision goes through [`JobStore::try_claim`], a
//! version-checked compare-and-swap: of all callers presenting the same
//! `expected_version`, at most one gets `true`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::job::{EncryptionPoolId, Job, JobId, JobState};

/// Errors produced by store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store temporarily unreachable; worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Row does not exist.
    #[error("job {0} not found in store")]
    NotFound(JobId),
    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Which in-progress jobs block a READY_TO_START candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningExclusion {
    /// Nothing blocks a candidate.
    None,
    /// Blocked while another job of the same project is in progress.
    SameProject,
    /// Blocked while another job of the same project and module group is in progress.
    SameProjectAndModuleGroup,
}

impl RunningExclusion {
    /// True when `running` blocks `candidate` under this exclusion.
    #[must_use]
    pub fn blocks(self, running: &Job, candidate: &Job) -> bool {
        match self {
            Self::None => false,
            Self::SameProject => running.project_key == candidate.project_key,
            Self::SameProjectAndModuleGroup => {
                running.project_key == candidate.project_key
                    && running.module_group_key == candidate.module_group_key
            }
        }
    }
}

/// Abstraction for durable, linearizable job storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Load a job by id.
    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Oldest `READY_TO_START` job (by `created_at_ms`) whose pool is in
    /// `pools` and that is not blocked by an in-progress job under `exclusion`.
    async fn next_ready(
        &self,
        pools: &BTreeSet<EncryptionPoolId>,
        exclusion: RunningExclusion,
    ) -> Result<Option<Job>, StoreError>;

    /// Oldest `SUSPENDED` job whose pool is in `pools` and that was suspended
    /// at or before `suspended_before_ms`.
    async fn next_suspended(
        &self,
        pools: &BTreeSet<EncryptionPoolId>,
        suspended_before_ms: u128,
    ) -> Result<Option<Job>, StoreError>;

    /// Claim `id` if its version still equals `expected_version` and it is
    /// `READY_TO_START` or `SUSPENDED`. On success the job becomes `STARTED`,
    /// its version is incremented and `started_at_ms` is set unless already
    /// present. Returns `false` when no row was updated.
    async fn try_claim(
        &self,
        id: JobId,
        expected_version: u64,
        now_ms: u128,
    ) -> Result<bool, StoreError>;

    /// Unconditionally move a job to `state`; terminal states set `ended_at_ms`.
    async fn update_state(
        &self,
        id: JobId,
        state: JobState,
        now_ms: u128,
    ) -> Result<(), StoreError>;

    /// Mark those of the given jobs that are still in progress `SUSPENDED`
    /// with `ended_at_ms`; returns the number updated.
    async fn mark_suspended(&self, ids: &[JobId], ended_at_ms: u128) -> Result<usize, StoreError>;
}
