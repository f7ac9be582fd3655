//! Periodic trigger that moves claimed jobs into the execution queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::resolver::SchedulerNextJobResolver;
use crate::config::TriggerConfig;
use crate::core::error::SchedulerError;
use crate::core::execution::{ExecutionService, Spawn};
use crate::core::job::{Job, JobId, JobState};
use crate::core::resilience::ResilientActionExecutor;
use crate::core::store::{JobStore, StoreError};
use crate::util::clock::now_ms;

/// What one trigger cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The instance is terminating.
    Terminating,
    /// Job processing is switched off.
    ProcessingDisabled,
    /// No free slot in the execution queue.
    QueueFull,
    /// Nothing eligible.
    NoJob,
    /// The job was claimed and admitted.
    Admitted(JobId),
    /// Resolution failed at the store.
    ResolveFailed(StoreError),
    /// The job was claimed but could not be admitted; it was marked `FAILED`.
    AdmissionFailed {
        /// Claimed job.
        job_id: JobId,
        /// Admission error rendered as text.
        reason: String,
    },
}

/// Drives [`SchedulerNextJobResolver`] and [`ExecutionService`] on a fixed delay.
pub struct SchedulerTrigger<S> {
    resolver: SchedulerNextJobResolver,
    execution: Arc<ExecutionService<S>>,
    store: Arc<dyn JobStore>,
    resilience: ResilientActionExecutor<StoreError>,
    config: TriggerConfig,
    terminating: AtomicBool,
    processing_enabled: AtomicBool,
}

impl<S> SchedulerTrigger<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Create a trigger; nothing runs until [`start`](Self::start) or
    /// [`trigger_next_job`](Self::trigger_next_job).
    pub fn new(
        resolver: SchedulerNextJobResolver,
        execution: Arc<ExecutionService<S>>,
        store: Arc<dyn JobStore>,
        config: TriggerConfig,
    ) -> Self {
        let processing_enabled = AtomicBool::new(config.job_processing_enabled);
        Self {
            resolver,
            execution,
            store,
            resilience: ResilientActionExecutor::new(),
            config,
            terminating: AtomicBool::new(false),
            processing_enabled,
        }
    }

    /// Use `resilience` when loading a claimed job and when marking it `FAILED`.
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilientActionExecutor<StoreError>) -> Self {
        self.resilience = resilience;
        self
    }

    /// Switch job processing on or off.
    pub fn set_job_processing_enabled(&self, enabled: bool) {
        self.processing_enabled.store(enabled, Ordering::Release);
        info!(enabled, "job processing switched");
    }

    /// Whether cycles currently pick up jobs.
    #[must_use]
    pub fn is_job_processing_enabled(&self) -> bool {
        self.processing_enabled.load(Ordering::Acquire)
    }

    /// Stop picking up jobs for good; in-flight cycles finish.
    pub fn mark_terminating(&self) {
        self.terminating.store(true, Ordering::Release);
    }

    /// Run a single cycle.
    pub async fn trigger_next_job(&self) -> TriggerOutcome {
        if self.terminating.load(Ordering::Acquire) {
            debug!("terminating, trigger skipped");
            return TriggerOutcome::Terminating;
        }
        if !self.is_job_processing_enabled() {
            debug!("job processing disabled, trigger skipped");
            return TriggerOutcome::ProcessingDisabled;
        }
        if self.execution.is_queue_full() {
            debug!(
                queue_max = self.execution.queue_max(),
                "execution queue full, trigger skipped"
            );
            return TriggerOutcome::QueueFull;
        }

        let job_id = match self.resolver.resolve_next_job().await {
            Ok(Some(job_id)) => job_id,
            Ok(None) => return TriggerOutcome::NoJob,
            Err(e) => {
                error!(error = %e, "could not resolve next job");
                return TriggerOutcome::ResolveFailed(e);
            }
        };

        let admission = match self.load(job_id).await {
            Ok(job) => self.execution.add_to_execution_queue(&job).await,
            Err(e) => Err(e),
        };
        match admission {
            Ok(()) => TriggerOutcome::Admitted(job_id),
            Err(e) => {
                let reason = e.to_string();
                warn!(%job_id, %reason, "claimed job could not be admitted, marking FAILED");
                self.mark_failed(job_id).await;
                TriggerOutcome::AdmissionFailed { job_id, reason }
            }
        }
    }

    async fn load(&self, job_id: JobId) -> Result<Job, SchedulerError> {
        let store = self.store.as_ref();
        let identifier = format!("load claimed job {job_id}");
        self.resilience
            .execute(&identifier, || store.find(job_id))
            .await?
            .ok_or(SchedulerError::JobNotFound(job_id))
    }

    async fn mark_failed(&self, job_id: JobId) {
        let store = self.store.as_ref();
        let identifier = format!("mark job {job_id} FAILED");
        let result = self
            .resilience
            .execute(&identifier, || store.update_state(job_id, JobState::Failed, now_ms()))
            .await;
        if let Err(e) = result {
            error!(%job_id, error = %e, "could not mark job FAILED");
        }
    }

    /// Run cycles on `spawner` after the initial delay, then with a fixed
    /// delay between the end of one cycle and the start of the next.
    pub fn start(self: &Arc<Self>, spawner: &impl Spawn) -> TriggerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let trigger = Arc::clone(self);
        let initial_delay = Duration::from_millis(self.config.initial_delay_ms);
        spawner.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(initial_delay) => {}
                _ = stop_rx.changed() => return,
            }
            loop {
                let outcome = trigger.trigger_next_job().await;
                debug!(?outcome, "trigger cycle finished");
                if outcome == TriggerOutcome::Terminating {
                    break;
                }
                tokio::select! {
                    () = tokio::time::sleep(trigger.next_delay()) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("scheduler trigger stopped");
        });
        info!(
            initial_delay_ms = self.config.initial_delay_ms,
            delay_ms = self.config.delay_ms,
            "scheduler trigger started"
        );
        TriggerHandle { stop: stop_tx }
    }

    fn next_delay(&self) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.jitter_ms)
        };
        Duration::from_millis(self.config.delay_ms.saturating_add(jitter))
    }
}

/// Stops a running trigger loop when told to or when dropped.
pub struct TriggerHandle {
    stop: watch::Sender<bool>,
}

impl TriggerHandle {
    /// Stop the loop after its current cycle.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}
