//! Builder wiring store, resolver, execution service and trigger from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::core::{
    AuditSink, EncryptionPoolProvider, ExecutionService, JobStore, SchedulerError,
    SchedulerNextJobResolver, SchedulerTrigger, Spawn, TaskFactory, TriggerHandle,
};

/// A fully wired scheduler instance.
pub struct Engine<S> {
    /// Shared job store.
    pub store: Arc<dyn JobStore>,
    /// Execution queue.
    pub execution: Arc<ExecutionService<S>>,
    /// Periodic trigger (owns the resolver).
    pub trigger: Arc<SchedulerTrigger<S>>,
    spawner: S,
}

impl<S> Engine<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Start the execution watcher and the trigger loop.
    pub fn start(&self) -> TriggerHandle {
        self.execution.start_watcher();
        self.trigger.start(&self.spawner)
    }

    /// Stop picking up jobs and suspend every unfinished one.
    ///
    /// # Errors
    ///
    /// Returns the store error if the suspension could not be persisted.
    pub async fn shutdown(&self) -> Result<usize, SchedulerError> {
        self.trigger.mark_terminating();
        self.execution.shutdown().await
    }
}

/// Build an [`Engine`] from a validated configuration.
///
/// Each component gets its own store executor so that a fallthrough window
/// opened by one does not short-circuit the other.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidConfig`] when `cfg` does not validate.
pub fn build_engine<S>(
    cfg: &EngineConfig,
    store: Arc<dyn JobStore>,
    pools: Arc<dyn EncryptionPoolProvider>,
    factory: Arc<dyn TaskFactory>,
    spawner: S,
    audit: Option<Arc<dyn AuditSink>>,
) -> Result<Engine<S>, SchedulerError>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let mut execution = ExecutionService::new(
        cfg.execution.clone(),
        factory,
        Arc::clone(&store),
        spawner.clone(),
    )?
    .with_resilience(cfg.resilience.build_store_executor());
    if let Some(audit) = audit {
        execution = execution.with_audit(audit);
    }
    let execution = Arc::new(execution);

    let resolver = SchedulerNextJobResolver::new(Arc::clone(&store), pools, cfg.resolver.strategy)
        .with_min_suspend_duration(cfg.resolver.min_suspend_duration())
        .with_resilience(cfg.resilience.build_store_executor());

    let trigger = Arc::new(
        SchedulerTrigger::new(
            resolver,
            Arc::clone(&execution),
            Arc::clone(&store),
            cfg.trigger.clone(),
        )
        .with_resilience(cfg.resilience.build_store_executor()),
    );

    info!(
        queue_max = cfg.execution.queue_max,
        worker_count = cfg.execution.worker_count,
        strategy = %cfg.resolver.strategy,
        "scheduler engine built"
    );
    Ok(Engine {
        store,
        execution,
        trigger,
        spawner,
    })
}
