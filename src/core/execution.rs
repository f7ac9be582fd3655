//! Bounded execution queue with a completion watcher.
//!
//! Admitted jobs become queue entries and run as spawned worker tasks, at
//! most `worker_count` of them at a time. An entry counts against
//! `queue_max` until the watcher has seen its task finish and persisted the
//! terminal state; only then is the entry marked done and its slot released.
//!
//! The watcher ignores an entry until its `QUEUED` state is in the store, so
//! a terminal state is never overwritten by a late admission write.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::error::SchedulerError;
use crate::core::executor::{ExecutionResult, ScanTask, TaskFactory};
use crate::core::job::{Job, JobId, JobState};
use crate::core::resilience::ResilientActionExecutor;
use crate::core::store::{JobStore, StoreError};
use crate::util::clock::now_ms;

/// Spawner abstraction to decouple from a specific runtime.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELED_BEFORE_START: u8 = 3;
const SUSPENDED_BEFORE_START: u8 = 4;

enum TaskOutcome {
    Completed(ExecutionResult),
    Failed(String),
}

/// Handle shared between the queue entry and its worker.
///
/// `phase` arbitrates the start/cancel race: the worker moves it from
/// `PENDING` to `RUNNING`, `cancel` from `PENDING` to `CANCELED_BEFORE_START`
/// and `shutdown` from `PENDING` to `SUSPENDED_BEFORE_START`; exactly one of
/// them wins.
struct TaskControl {
    phase: AtomicU8,
    task: Arc<dyn ScanTask>,
    outcome: Mutex<Option<TaskOutcome>>,
}

impl TaskControl {
    fn new(task: Arc<dyn ScanTask>) -> Self {
        Self {
            phase: AtomicU8::new(PENDING),
            task,
            outcome: Mutex::new(None),
        }
    }

    fn finish(&self, outcome: TaskOutcome) {
        *self.outcome.lock() = Some(outcome);
        self.phase.store(FINISHED, Ordering::Release);
    }

    fn suspend_if_pending(&self) -> bool {
        self.phase
            .compare_exchange(PENDING, SUSPENDED_BEFORE_START, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Terminal state to persist, or `None` while the task is still pending or running.
    fn terminal_state(&self, cancel_requested: bool) -> Option<(JobState, Option<String>)> {
        match self.phase.load(Ordering::Acquire) {
            CANCELED_BEFORE_START => Some((JobState::Canceled, None)),
            FINISHED => match self.outcome.lock().as_ref()? {
                TaskOutcome::Completed(result) if result.canceled || cancel_requested => {
                    Some((JobState::Canceled, result.message.clone()))
                }
                TaskOutcome::Completed(result) => Some((JobState::Done, result.message.clone())),
                TaskOutcome::Failed(reason) if cancel_requested => {
                    Some((JobState::Canceled, Some(reason.clone())))
                }
                TaskOutcome::Failed(reason) => Some((JobState::Failed, Some(reason.clone()))),
            },
            _ => None,
        }
    }
}

/// One admitted job inside the execution queue.
struct ExecutionQueueEntry {
    job_id: JobId,
    submitted_at_ms: u128,
    done: bool,
    cancel_requested: bool,
    /// `QUEUED` has been persisted; before that the watcher leaves the entry alone.
    admitted: bool,
    /// Terminal (or suspended) state has been handed to the store.
    persisted: bool,
    control: Arc<TaskControl>,
}

impl ExecutionQueueEntry {
    fn status(&self) -> ExecutionEntryStatus {
        ExecutionEntryStatus {
            job_id: self.job_id,
            done: self.done,
            canceled: self.cancel_requested,
            submitted_at_ms: self.submitted_at_ms,
        }
    }
}

/// Outcome of [`ExecutionService::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelResult {
    /// The worker had not started; the task will never run.
    CanceledBeforeStart,
    /// The running task was asked to stop.
    CancelRequested,
    /// The entry had already finished; nothing changed.
    AlreadyDone,
    /// No entry for this job in the queue.
    NotFound,
}

/// Snapshot of one entry for admin views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEntryStatus {
    /// Admitted job.
    pub job_id: JobId,
    /// Slot released.
    pub done: bool,
    /// Cancel was requested or applied.
    pub canceled: bool,
    /// Admission time.
    pub submitted_at_ms: u128,
}

/// Snapshot of the whole execution queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    /// Configured capacity.
    pub queue_max: usize,
    /// Entries currently tracked, done ones included.
    pub jobs_in_queue: usize,
    /// Entries in admission order.
    pub entries: Vec<ExecutionEntryStatus>,
}

/// State shared with spawned workers and the watcher.
#[derive(Clone)]
struct Shared {
    entries: Arc<Mutex<Vec<ExecutionQueueEntry>>>,
    store: Arc<dyn JobStore>,
    resilience: Arc<ResilientActionExecutor<StoreError>>,
    audit: Option<Arc<dyn AuditSink>>,
    workers: Arc<Semaphore>,
    shut_down: Arc<AtomicBool>,
}

impl Shared {
    fn audit(&self, job_id: JobId, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(job_id, action, detail));
        }
    }

    async fn persist_state(&self, job_id: JobId, state: JobState) -> Result<(), StoreError> {
        let store = &self.store;
        let identifier = format!("persist {state} for job {job_id}");
        self.resilience
            .execute(&identifier, move || store.update_state(job_id, state, now_ms()))
            .await
    }

    async fn suspend(&self, job_ids: &[JobId]) -> Result<usize, StoreError> {
        let store = &self.store;
        let ended_at_ms = now_ms();
        let suspended = self
            .resilience
            .execute("suspend unfinished jobs", move || store.mark_suspended(job_ids, ended_at_ms))
            .await?;
        for job_id in job_ids {
            self.audit(*job_id, AuditAction::Suspend, None);
        }
        Ok(suspended)
    }

    /// One watcher cycle. Returns the number of entries released.
    async fn inspect(&self) -> usize {
        let finished: Vec<(Arc<TaskControl>, JobId, JobState, Option<String>)> = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| !(e.done && e.persisted));
            let pruned = before - entries.len();
            if pruned > 0 {
                debug!(pruned, "pruned done entries from execution queue");
            }
            entries
                .iter()
                .filter(|e| e.admitted && !e.persisted)
                .filter_map(|e| {
                    e.control
                        .terminal_state(e.cancel_requested)
                        .map(|(state, detail)| (Arc::clone(&e.control), e.job_id, state, detail))
                })
                .collect()
        };

        for (control, job_id, state, detail) in &finished {
            match self.persist_state(*job_id, *state).await {
                Ok(()) => info!(%job_id, %state, "job finished"),
                Err(e) => error!(
                    %job_id,
                    %state,
                    error = %e,
                    "could not persist terminal state, releasing queue slot anyway"
                ),
            }
            match state {
                JobState::Done => self.audit(*job_id, AuditAction::Done, detail.clone()),
                JobState::Failed => self.audit(*job_id, AuditAction::Failed, detail.clone()),
                _ => {}
            }
            if let Some(entry) = self
                .entries
                .lock()
                .iter_mut()
                .find(|e| Arc::ptr_eq(&e.control, control))
            {
                entry.done = true;
                entry.persisted = true;
            }
        }
        finished.len()
    }
}

async fn run_worker(shared: Shared, job_id: JobId, control: Arc<TaskControl>) {
    let Ok(_permit) = Arc::clone(&shared.workers).acquire_owned().await else {
        debug!(%job_id, "execution service shut down, task not run");
        return;
    };
    if control
        .phase
        .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!(%job_id, "canceled or suspended before start, task not run");
        return;
    }
    if let Err(e) = shared.persist_state(job_id, JobState::Running).await {
        warn!(%job_id, error = %e, "could not persist RUNNING state");
    }
    if shared.shut_down.load(Ordering::SeqCst) {
        // RUNNING may have landed after shutdown suspended the row
        if let Err(e) = shared.suspend(&[job_id]).await {
            error!(%job_id, error = %e, "could not suspend job started during shutdown");
        }
        control.finish(TaskOutcome::Completed(ExecutionResult::canceled()));
        info!(%job_id, "execution service shut down, task not run");
        return;
    }
    shared.audit(job_id, AuditAction::Start, None);
    info!(%job_id, "scan task started");

    let task = Arc::clone(&control.task);
    let outcome = match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(Ok(result)) => TaskOutcome::Completed(result),
        Ok(Err(err)) => {
            warn!(%job_id, error = %format!("{err:#}"), "scan task failed");
            TaskOutcome::Failed(format!("{err:#}"))
        }
        Err(_) => {
            error!(%job_id, "scan task panicked");
            TaskOutcome::Failed("scan task panicked".into())
        }
    };
    control.finish(outcome);
}

/// Bounded dispatch service for admitted scan jobs.
pub struct ExecutionService<S> {
    config: ExecutionConfig,
    shared: Shared,
    factory: Arc<dyn TaskFactory>,
    spawner: S,
    watcher_stop: Mutex<Option<watch::Sender<bool>>>,
}

impl<S> ExecutionService<S>
where
    S: Spawn,
{
    /// Create a service. The watcher is not running until [`start_watcher`](Self::start_watcher).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] for an invalid configuration.
    pub fn new(
        config: ExecutionConfig,
        factory: Arc<dyn TaskFactory>,
        store: Arc<dyn JobStore>,
        spawner: S,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            shared: Shared {
                entries: Arc::new(Mutex::new(Vec::new())),
                store,
                resilience: Arc::new(ResilientActionExecutor::new()),
                audit: None,
                workers: Arc::new(Semaphore::new(config.worker_count.min(Semaphore::MAX_PERMITS))),
                shut_down: Arc::new(AtomicBool::new(false)),
            },
            config,
            factory,
            spawner,
            watcher_stop: Mutex::new(None),
        })
    }

    /// Use `resilience` for every store write.
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilientActionExecutor<StoreError>) -> Self {
        self.shared.resilience = Arc::new(resilience);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.shared.audit = Some(audit);
        self
    }

    /// Configured capacity.
    #[must_use]
    pub const fn queue_max(&self) -> usize {
        self.config.queue_max
    }

    /// Maximum number of scan tasks running at the same time.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Whether admission would currently be rejected for capacity.
    #[must_use]
    pub fn is_queue_full(&self) -> bool {
        let entries = self.shared.entries.lock();
        self.is_full(not_done(&entries))
    }

    const fn is_full(&self, in_queue: usize) -> bool {
        self.config.queue_max == 0 || in_queue >= self.config.queue_max
    }

    fn check_admission(
        &self,
        entries: &[ExecutionQueueEntry],
        job_id: JobId,
    ) -> Result<usize, SchedulerError> {
        if entries.iter().any(|e| e.job_id == job_id && !e.done) {
            return Err(SchedulerError::AlreadyQueued(job_id));
        }
        let in_queue = not_done(entries);
        if self.is_full(in_queue) {
            return Err(SchedulerError::QueueFull {
                in_queue,
                queue_max: self.config.queue_max,
            });
        }
        Ok(in_queue)
    }

    /// Admit `job`: reserve a slot, persist `QUEUED`, then hand the entry to
    /// the watcher and start its worker.
    ///
    /// The slot is reserved before `QUEUED` is written, so a concurrent
    /// [`cancel`](Self::cancel) already finds the entry; its `CANCELED` state
    /// is persisted by the watcher after `QUEUED`.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::QueueFull`] when `queue_max` entries are not done.
    /// - [`SchedulerError::AlreadyQueued`] when the job has a live entry.
    /// - [`SchedulerError::TaskCreation`] when the factory fails.
    /// - [`SchedulerError::Store`] when `QUEUED` cannot be persisted; the entry is removed.
    /// - [`SchedulerError::Shutdown`] after [`shutdown`](Self::shutdown), also when
    ///   shutdown happened while `QUEUED` was being written; the job is then
    ///   suspended (or canceled, if that was requested meanwhile).
    pub async fn add_to_execution_queue(&self, job: &Job) -> Result<(), SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::Shutdown);
        }
        let job_id = job.id;
        if let Err(e) = self.check_admission(&self.shared.entries.lock(), job_id) {
            warn!(%job_id, error = %e, "job rejected by execution queue");
            return Err(e);
        }

        let task = self
            .factory
            .create_task(job)
            .map_err(|e| SchedulerError::TaskCreation {
                job_id,
                reason: format!("{e:#}"),
            })?;
        let control = Arc::new(TaskControl::new(task));

        let in_queue = {
            let mut entries = self.shared.entries.lock();
            let in_queue = match self.check_admission(&entries, job_id) {
                Ok(n) => n,
                Err(e) => {
                    warn!(%job_id, error = %e, "job rejected by execution queue");
                    return Err(e);
                }
            };
            entries.retain(|e| e.job_id != job_id);
            entries.push(ExecutionQueueEntry {
                job_id,
                submitted_at_ms: now_ms(),
                done: false,
                cancel_requested: false,
                admitted: false,
                persisted: false,
                control: Arc::clone(&control),
            });
            in_queue + 1
        };

        if let Err(e) = self.shared.persist_state(job_id, JobState::Queued).await {
            self.shared
                .entries
                .lock()
                .retain(|entry| !Arc::ptr_eq(&entry.control, &control));
            error!(%job_id, error = %e, "could not persist QUEUED state, entry removed");
            return Err(e.into());
        }
        self.shared.audit(job_id, AuditAction::Queue, None);

        // shutdown sets its flag before taking this lock: either it sees the
        // admitted entry or this block sees the flag
        let shut_down = {
            let mut entries = self.shared.entries.lock();
            if self.is_shut_down() {
                entries.retain(|entry| !Arc::ptr_eq(&entry.control, &control));
                true
            } else {
                let entry = entries.iter_mut().find(|e| Arc::ptr_eq(&e.control, &control));
                if let Some(entry) = entry {
                    entry.admitted = true;
                }
                false
            }
        };
        if shut_down {
            self.release_after_shutdown(job_id, &control).await;
            return Err(SchedulerError::Shutdown);
        }
        info!(
            %job_id,
            in_queue,
            queue_max = self.config.queue_max,
            "job added to execution queue"
        );

        self.spawner.spawn(run_worker(self.shared.clone(), job_id, control));
        Ok(())
    }

    async fn release_after_shutdown(&self, job_id: JobId, control: &TaskControl) {
        let result = if control.suspend_if_pending() {
            self.shared.suspend(&[job_id]).await.map(|_| ())
        } else {
            self.shared.persist_state(job_id, JobState::Canceled).await
        };
        match result {
            Ok(()) => info!(%job_id, "shut down during admission, job handed back to store"),
            Err(e) => error!(%job_id, error = %e, "could not release job admitted during shutdown"),
        }
    }

    /// Cancel the entry for `job_id`.
    ///
    /// A worker that has not started never runs its task and the entry is
    /// released at once. A running task only gets a cancel request; its slot
    /// is released when the watcher sees it finish.
    pub fn cancel(&self, job_id: JobId) -> CancelResult {
        let (result, running) = {
            let mut entries = self.shared.entries.lock();
            let Some(entry) = entries.iter_mut().find(|e| e.job_id == job_id) else {
                debug!(%job_id, "cancel for unknown job");
                return CancelResult::NotFound;
            };
            if entry.done {
                (CancelResult::AlreadyDone, None)
            } else if entry.cancel_requested {
                (CancelResult::CancelRequested, None)
            } else {
                match entry.control.phase.compare_exchange(
                    PENDING,
                    CANCELED_BEFORE_START,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        entry.done = true;
                        entry.cancel_requested = true;
                        (CancelResult::CanceledBeforeStart, None)
                    }
                    Err(FINISHED) => (CancelResult::AlreadyDone, None),
                    Err(_) => {
                        entry.cancel_requested = true;
                        (CancelResult::CancelRequested, Some(Arc::clone(&entry.control)))
                    }
                }
            }
        };

        if let Some(control) = running {
            control.task.prepare_for_cancel(true);
        }
        if matches!(result, CancelResult::CanceledBeforeStart | CancelResult::CancelRequested) {
            self.shared.audit(job_id, AuditAction::Cancel, None);
        }
        info!(%job_id, ?result, "cancel handled");
        result
    }

    /// Snapshot of the queue.
    #[must_use]
    pub fn execution_status(&self) -> ExecutionStatus {
        let entries = self.shared.entries.lock();
        ExecutionStatus {
            queue_max: self.config.queue_max,
            jobs_in_queue: entries.len(),
            entries: entries.iter().map(ExecutionQueueEntry::status).collect(),
        }
    }

    /// Run one watcher cycle now. Returns the number of entries released.
    pub async fn run_watcher_cycle(&self) -> usize {
        self.shared.inspect().await
    }

    /// Start the periodic watcher unless it is disabled or already running.
    pub fn start_watcher(&self) {
        if self.config.watcher_disabled {
            debug!("execution queue watcher disabled");
            return;
        }
        let mut slot = self.watcher_stop.lock();
        if slot.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *slot = Some(stop_tx);

        let shared = self.shared.clone();
        let initial_delay = self.config.watcher_initial_delay();
        let period = self.config.watcher_interval();
        self.spawner.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(initial_delay) => {}
                _ = stop_rx.changed() => return,
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        shared.inspect().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("execution queue watcher stopped");
        });
        info!(interval_ms = self.config.watcher_interval_ms, "execution queue watcher started");
    }

    /// Stop the periodic watcher.
    pub fn stop_watcher(&self) {
        if let Some(stop) = self.watcher_stop.lock().take() {
            let _ = stop.send(true);
        }
    }

    /// Stop admitting jobs, stop the watcher and hand every unfinished job
    /// back to the store as `SUSPENDED` so another instance can resume it.
    ///
    /// Workers that have not started never run their task. Running tasks are
    /// not interrupted, but their outcome is no longer persisted.
    ///
    /// Returns the number of jobs suspended. A second call does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] when the suspension cannot be persisted.
    pub async fn shutdown(&self) -> Result<usize, SchedulerError> {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        self.stop_watcher();
        self.shared.workers.close();

        let unfinished: Vec<JobId> = {
            let mut entries = self.shared.entries.lock();
            entries
                .iter_mut()
                .filter(|e| e.admitted && !e.done)
                .map(|e| {
                    e.control.suspend_if_pending();
                    e.persisted = true;
                    e.job_id
                })
                .collect()
        };
        if unfinished.is_empty() {
            info!("execution service shut down, nothing to suspend");
            return Ok(0);
        }

        let suspended = self.shared.suspend(&unfinished).await?;
        info!(suspended, "execution service shut down, unfinished jobs suspended");
        Ok(suspended)
    }
}

impl<S> Drop for ExecutionService<S> {
    fn drop(&mut self) {
        if let Some(stop) = self.watcher_stop.get_mut().take() {
            let _ = stop.send(true);
        }
    }
}

fn not_done(entries: &[ExecutionQueueEntry]) -> usize {
    entries.iter().filter(|e| !e.done).count()
}
