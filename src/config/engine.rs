//! Engine configuration: execution queue, resolver, trigger and resilience.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::resilience::{FallthroughConsultant, ResilientActionExecutor, RetryConsultant};
use crate::core::scheduler::SchedulerStrategy;
use crate::core::store::StoreError;

/// Execution queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum number of entries that are not yet done. `0` keeps the queue full.
    pub queue_max: usize,
    /// Scan tasks running at the same time; further admitted jobs wait as `QUEUED`.
    pub worker_count: usize,
    /// Period of the completion watcher.
    pub watcher_interval_ms: u64,
    /// Delay before the first watcher cycle.
    pub watcher_initial_delay_ms: u64,
    /// Do not start the watcher; tests drive cycles by hand.
    pub watcher_disabled: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            queue_max: 50,
            worker_count: 5,
            watcher_interval_ms: 1_000,
            watcher_initial_delay_ms: 300,
            watcher_disabled: false,
        }
    }
}

impl ExecutionConfig {
    /// Validate execution queue values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.watcher_interval_ms == 0 {
            return Err("watcher_interval_ms must be greater than 0".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        Ok(())
    }

    /// Watcher period as a duration.
    #[must_use]
    pub const fn watcher_interval(&self) -> Duration {
        Duration::from_millis(self.watcher_interval_ms)
    }

    /// Watcher start delay as a duration.
    #[must_use]
    pub const fn watcher_initial_delay(&self) -> Duration {
        Duration::from_millis(self.watcher_initial_delay_ms)
    }
}

/// Next-job resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Active selection strategy.
    pub strategy: SchedulerStrategy,
    /// Minimum age of a suspension before the job may be resumed.
    pub min_suspend_duration_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategy: SchedulerStrategy::FirstComeFirstServe,
            min_suspend_duration_ms: 1_000,
        }
    }
}

impl ResolverConfig {
    /// Minimum suspend age as a duration.
    #[must_use]
    pub const fn min_suspend_duration(&self) -> Duration {
        Duration::from_millis(self.min_suspend_duration_ms)
    }
}

/// Periodic trigger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Delay before the first trigger cycle.
    pub initial_delay_ms: u64,
    /// Delay between the end of one cycle and the start of the next.
    pub delay_ms: u64,
    /// Upper bound of a random extra delay, spreading instances that share a store.
    pub jitter_ms: u64,
    /// Global switch; when off, cycles do nothing.
    pub job_processing_enabled: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            delay_ms: 10_000,
            jitter_ms: 0,
            job_processing_enabled: true,
        }
    }
}

impl TriggerConfig {
    /// Validate trigger values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.delay_ms == 0 {
            return Err("delay_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Resilience applied to job record store calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retries for transient store failures.
    pub max_retries: u32,
    /// Wait between retries.
    pub wait_ms: u64,
    /// Fallthrough window for non-transient backend failures; `0` disables it.
    pub fallthrough_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_ms: 100,
            fallthrough_ms: 0,
        }
    }
}

impl ResilienceConfig {
    /// Build a store-call executor: retry transient failures, optionally
    /// fall through on backend failures.
    #[must_use]
    pub fn build_store_executor(&self) -> ResilientActionExecutor<StoreError> {
        let mut executor = ResilientActionExecutor::new().with_consultant(
            RetryConsultant::new(self.max_retries, Duration::from_millis(self.wait_ms))
                .when(StoreError::is_transient),
        );
        if self.fallthrough_ms > 0 {
            executor.add(
                FallthroughConsultant::new(Duration::from_millis(self.fallthrough_ms))
                    .when(|e: &StoreError| matches!(e, StoreError::Backend(_))),
            );
        }
        executor
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Execution queue section.
    pub execution: ExecutionConfig,
    /// Resolver section.
    pub resolver: ResolverConfig,
    /// Trigger section.
    pub trigger: TriggerConfig,
    /// Store resilience section.
    pub resilience: ResilienceConfig,
}

impl EngineConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value, prefixed with its section.
    pub fn validate(&self) -> Result<(), String> {
        self.execution
            .validate()
            .map_err(|e| format!("execution invalid: {e}"))?;
        self.trigger
            .validate()
            .map_err(|e| format!("trigger invalid: {e}"))?;
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns parse or validation failures.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then read `SCHEDULER_*` variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns unparsable variables or validation failures.
    pub fn from_env() -> Result<Self, String> {
        // Missing .env is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; used by [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// Returns unparsable variables or validation failures.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let ex = &mut cfg.execution;
        read_var(&lookup, "SCHEDULER_QUEUE_MAX", &mut ex.queue_max)?;
        read_var(&lookup, "SCHEDULER_WORKER_COUNT", &mut ex.worker_count)?;
        read_var(&lookup, "SCHEDULER_WATCHER_INTERVAL_MS", &mut ex.watcher_interval_ms)?;
        read_var(
            &lookup,
            "SCHEDULER_WATCHER_INITIAL_DELAY_MS",
            &mut ex.watcher_initial_delay_ms,
        )?;

        let res = &mut cfg.resolver;
        read_var(&lookup, "SCHEDULER_STRATEGY", &mut res.strategy)?;
        read_var(
            &lookup,
            "SCHEDULER_MIN_SUSPEND_DURATION_MS",
            &mut res.min_suspend_duration_ms,
        )?;

        let trig = &mut cfg.trigger;
        read_var(
            &lookup,
            "SCHEDULER_TRIGGER_INITIAL_DELAY_MS",
            &mut trig.initial_delay_ms,
        )?;
        read_var(&lookup, "SCHEDULER_TRIGGER_DELAY_MS", &mut trig.delay_ms)?;
        read_var(&lookup, "SCHEDULER_TRIGGER_JITTER_MS", &mut trig.jitter_ms)?;
        read_var(
            &lookup,
            "SCHEDULER_JOB_PROCESSING_ENABLED",
            &mut trig.job_processing_enabled,
        )?;

        let resil = &mut cfg.resilience;
        read_var(&lookup, "SCHEDULER_RESILIENCE_MAX_RETRIES", &mut resil.max_retries)?;
        read_var(&lookup, "SCHEDULER_RESILIENCE_WAIT_MS", &mut resil.wait_ms)?;
        read_var(
            &lookup,
            "SCHEDULER_RESILIENCE_FALLTHROUGH_MS",
            &mut resil.fallthrough_ms,
        )?;

        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))?;
    }
    Ok(())
}
