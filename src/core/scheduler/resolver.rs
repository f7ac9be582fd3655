//! Next-job resolver: resume suspended work first, then apply the strategy.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::pools::EncryptionPoolProvider;
use super::strategy::SchedulerStrategy;
use crate::core::job::{EncryptionPoolId, JobId};
use crate::core::resilience::ResilientActionExecutor;
use crate::core::store::{JobStore, StoreError};
use crate::util::clock::{elapsed_ms, now_ms};

/// Default minimum age of a suspension before it may be resumed.
pub const DEFAULT_MIN_SUSPEND_DURATION: Duration = Duration::from_secs(1);

/// Resolves and claims the next job this instance should execute.
pub struct SchedulerNextJobResolver {
    store: Arc<dyn JobStore>,
    pools: Arc<dyn EncryptionPoolProvider>,
    strategy: SchedulerStrategy,
    min_suspend_duration: Duration,
    resilience: ResilientActionExecutor<StoreError>,
}

impl SchedulerNextJobResolver {
    /// Resolver without store resilience and the default suspend age.
    pub fn new(
        store: Arc<dyn JobStore>,
        pools: Arc<dyn EncryptionPoolProvider>,
        strategy: SchedulerStrategy,
    ) -> Self {
        Self {
            store,
            pools,
            strategy,
            min_suspend_duration: DEFAULT_MIN_SUSPEND_DURATION,
            resilience: ResilientActionExecutor::new(),
        }
    }

    /// Suspended jobs younger than `duration` are left alone.
    #[must_use]
    pub const fn with_min_suspend_duration(mut self, duration: Duration) -> Self {
        self.min_suspend_duration = duration;
        self
    }

    /// Run store interactions through `resilience`.
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilientActionExecutor<StoreError>) -> Self {
        self.resilience = resilience;
        self
    }

    /// Active strategy.
    #[must_use]
    pub const fn strategy(&self) -> SchedulerStrategy {
        self.strategy
    }

    /// Resolve and claim the next job now.
    ///
    /// # Errors
    ///
    /// Returns the store error once resilience is exhausted.
    pub async fn resolve_next_job(&self) -> Result<Option<JobId>, StoreError> {
        self.resolve_next_job_at(now_ms()).await
    }

    /// Resolve and claim the next job as of `now_ms`.
    ///
    /// A suspended job whose suspension is at least the minimum suspend
    /// duration old wins over any ready job. The returned job has been
    /// claimed by this call.
    ///
    /// # Errors
    ///
    /// Returns the store error once resilience is exhausted.
    pub async fn resolve_next_job_at(&self, now_ms: u128) -> Result<Option<JobId>, StoreError> {
        let pools = self.pools.supported_pool_ids();
        if pools.is_empty() {
            warn!("no encryption pools supported, no job can be resolved");
            return Ok(None);
        }
        let store = self.store.as_ref();
        let pools = &pools;

        let suspended_before_ms = now_ms.saturating_sub(self.min_suspend_duration.as_millis());
        let resumed = self
            .resilience
            .execute("resume suspended job", move || {
                resume_suspended(store, pools, suspended_before_ms, now_ms)
            })
            .await?;
        if resumed.is_some() {
            return Ok(resumed);
        }

        let strategy = self.strategy;
        let next = self
            .resilience
            .execute("resolve next job", move || strategy.next_job_id(store, pools, now_ms))
            .await?;
        if next.is_none() {
            debug!(%strategy, "no job eligible");
        }
        Ok(next)
    }
}

async fn resume_suspended(
    store: &dyn JobStore,
    pools: &BTreeSet<EncryptionPoolId>,
    suspended_before_ms: u128,
    now_ms: u128,
) -> Result<Option<JobId>, StoreError> {
    loop {
        let Some(candidate) = store.next_suspended(pools, suspended_before_ms).await? else {
            return Ok(None);
        };
        if store.try_claim(candidate.id, candidate.version, now_ms).await? {
            info!(
                job_id = %candidate.id,
                suspended_for_ms = elapsed_ms(candidate.ended_at_ms.unwrap_or(now_ms), now_ms),
                "resumed suspended job"
            );
            return Ok(Some(candidate.id));
        }
        debug!(job_id = %candidate.id, "suspended job claimed elsewhere, selecting again");
    }
}
