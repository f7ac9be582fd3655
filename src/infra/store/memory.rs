//! In-memory job store with version-checked claiming.
//!
//! All rows live behind one `parking_lot::Mutex`, so every operation is
//! linearizable. Several scheduler instances sharing one `Arc` of this store
//! behave like instances sharing a database table.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::job::{EncryptionPoolId, Job, JobId, JobState};
use crate::core::store::{JobStore, RunningExclusion, StoreError};

/// In-memory store for development, tests and benchmarks.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    /// Number of upcoming operations that fail with `Unavailable`.
    injected_failures: AtomicUsize,
    /// Operations that still succeed before the injected failures start.
    failures_deferred: AtomicUsize,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store operations fail with [`StoreError::Unavailable`].
    pub fn inject_failures(&self, count: usize) {
        self.inject_failures_after(0, count);
    }

    /// Let `skip` store operations succeed, then fail the following `count`.
    pub fn inject_failures_after(&self, skip: usize, count: usize) {
        self.failures_deferred.store(skip, Ordering::SeqCst);
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of a single row, bypassing failure injection.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().get(&id).cloned()
    }

    /// Snapshot of all rows ordered by creation time.
    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        let mut all: Vec<Job> = self.jobs.lock().values().cloned().collect();
        all.sort_by_key(|j| j.created_at_ms);
        all
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.injected_failures.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        let deferred = self
            .failures_deferred
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if deferred {
            return Ok(());
        }
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            tracing::debug!("injected store failure");
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.check_available()?;
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Backend(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn next_ready(
        &self,
        pools: &BTreeSet<EncryptionPoolId>,
        exclusion: RunningExclusion,
    ) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        let jobs = self.jobs.lock();
        let in_progress: Vec<&Job> = jobs.values().filter(|j| j.state.is_in_progress()).collect();

        let next = jobs
            .values()
            .filter(|j| j.state == JobState::ReadyToStart)
            .filter(|j| pools.contains(&j.encryption_pool_id))
            .filter(|j| !in_progress.iter().any(|running| exclusion.blocks(running, j)))
            .min_by_key(|j| j.created_at_ms)
            .cloned();
        Ok(next)
    }

    async fn next_suspended(
        &self,
        pools: &BTreeSet<EncryptionPoolId>,
        suspended_before_ms: u128,
    ) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        let jobs = self.jobs.lock();
        let next = jobs
            .values()
            .filter(|j| j.state == JobState::Suspended)
            .filter(|j| pools.contains(&j.encryption_pool_id))
            .filter(|j| j.ended_at_ms.unwrap_or(0) <= suspended_before_ms)
            .min_by_key(|j| j.created_at_ms)
            .cloned();
        Ok(next)
    }

    async fn try_claim(
        &self,
        id: JobId,
        expected_version: u64,
        now_ms: u128,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        let claimable = matches!(job.state, JobState::ReadyToStart | JobState::Suspended);
        if !claimable || job.version != expected_version {
            return Ok(false);
        }
        job.state = JobState::Started;
        job.version += 1;
        job.started_at_ms = job.started_at_ms.or(Some(now_ms));
        job.ended_at_ms = None;
        Ok(true)
    }

    async fn update_state(
        &self,
        id: JobId,
        state: JobState,
        now_ms: u128,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.state = state;
        job.version += 1;
        if state.is_terminal() {
            job.ended_at_ms = Some(now_ms);
        }
        Ok(())
    }

    async fn mark_suspended(&self, ids: &[JobId], ended_at_ms: u128) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut jobs = self.jobs.lock();
        let mut updated = 0;
        for id in ids {
            if let Some(job) = jobs.get_mut(id).filter(|j| j.state.is_in_progress()) {
                job.state = JobState::Suspended;
                job.ended_at_ms = Some(ended_at_ms);
                job.version += 1;
                updated += 1;
            }
        }
        Ok(updated)
    }
}
