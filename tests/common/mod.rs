//! Shared fixtures: scan tasks the test controls, and polling helpers.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use prometheus_scan_scheduler::core::{
    AppResult, ExecutionResult, ExecutionService, Job, JobStore, ScanTask, Spawn, TaskFactory,
};
use prometheus_scan_scheduler::infra::InMemoryJobStore;
use prometheus_scan_scheduler::util::clock::now_ms;

/// Spawns onto the ambient tokio runtime.
#[derive(Clone)]
pub struct TestSpawner;

impl Spawn for TestSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut);
    }
}

/// How a [`GatedTask`] ends once released.
#[derive(Debug, Clone, Copy)]
enum Ending {
    Succeed,
    Fail,
    Panic,
}

/// Blocks until the factory's gate opens or a cancel request arrives.
pub struct GatedTask {
    gate: watch::Receiver<bool>,
    cancel: Notify,
    started: Arc<AtomicUsize>,
    ending: Ending,
}

#[async_trait]
impl ScanTask for GatedTask {
    async fn run(&self) -> AppResult<ExecutionResult> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            () = wait_open(self.gate.clone()) => {}
            () = self.cancel.notified() => return Ok(ExecutionResult::canceled()),
        }
        match self.ending {
            Ending::Succeed => Ok(ExecutionResult::done("scan finished")),
            Ending::Fail => Err(anyhow!("scanner exited with code 2")),
            Ending::Panic => panic!("scanner adapter crashed"),
        }
    }

    fn prepare_for_cancel(&self, _interrupt_allowed: bool) {
        self.cancel.notify_one();
    }
}

async fn wait_open(mut gate: watch::Receiver<bool>) {
    loop {
        let open = *gate.borrow_and_update();
        if open || gate.changed().await.is_err() {
            return;
        }
    }
}

/// Creates [`GatedTask`]s. Projects named `fail-*` fail, `panic-*` panic,
/// `broken-*` cannot be turned into a task at all.
pub struct GatedFactory {
    gate: watch::Sender<bool>,
    started: Arc<AtomicUsize>,
    created: AtomicUsize,
}

impl GatedFactory {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self {
            gate,
            started: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
        })
    }

    /// Let every current and future task finish.
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TaskFactory for GatedFactory {
    fn create_task(&self, job: &Job) -> AppResult<Arc<dyn ScanTask>> {
        if job.project_key.starts_with("broken-") {
            return Err(anyhow!("no adapter for project {}", job.project_key));
        }
        let ending = if job.project_key.starts_with("fail-") {
            Ending::Fail
        } else if job.project_key.starts_with("panic-") {
            Ending::Panic
        } else {
            Ending::Succeed
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(GatedTask {
            gate: self.gate.subscribe(),
            cancel: Notify::new(),
            started: Arc::clone(&self.started),
            ending,
        }))
    }
}

/// Insert a ready job for `project` into the store.
pub async fn ready_job(store: &InMemoryJobStore, project: &str, module_group: &str) -> Job {
    let job = Job::ready(project, module_group, 0, now_ms());
    store.insert(job.clone()).await.unwrap();
    // keep creation times strictly ordered
    tokio::time::sleep(Duration::from_millis(2)).await;
    job
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Run watcher cycles by hand until `expected` entries were released.
pub async fn drain<S: Spawn>(service: &ExecutionService<S>, expected: usize) -> usize {
    let mut released = 0;
    for _ in 0..200 {
        released += service.run_watcher_cycle().await;
        if released >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    released
}
