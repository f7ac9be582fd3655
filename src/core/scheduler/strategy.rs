//! Job selection strategies.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::job::{EncryptionPoolId, JobId};
use crate::core::store::{JobStore, RunningExclusion, StoreError};

/// How the next `READY_TO_START` job is chosen.
///
/// Every strategy picks the oldest eligible job; they differ in which
/// in-progress jobs make a candidate ineligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerStrategy {
    /// Oldest ready job, regardless of what else is running.
    #[default]
    #[serde(rename = "first-come-first-serve")]
    FirstComeFirstServe,
    /// Skip projects that already have a job in progress.
    #[serde(rename = "only-one-scan-per-project-at-a-time")]
    OneScanPerProject,
    /// Skip project and module group pairs that already have a job in progress.
    #[serde(rename = "only-one-scan-per-project-and-module-group")]
    OneScanPerProjectAndModuleGroup,
}

impl SchedulerStrategy {
    /// Every strategy, in declaration order.
    pub const ALL: [Self; 3] = [
        Self::FirstComeFirstServe,
        Self::OneScanPerProject,
        Self::OneScanPerProjectAndModuleGroup,
    ];

    /// Stable identifier used in configuration.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::FirstComeFirstServe => "first-come-first-serve",
            Self::OneScanPerProject => "only-one-scan-per-project-at-a-time",
            Self::OneScanPerProjectAndModuleGroup => "only-one-scan-per-project-and-module-group",
        }
    }

    /// In-progress jobs that block a candidate under this strategy.
    #[must_use]
    pub const fn exclusion(self) -> RunningExclusion {
        match self {
            Self::FirstComeFirstServe => RunningExclusion::None,
            Self::OneScanPerProject => RunningExclusion::SameProject,
            Self::OneScanPerProjectAndModuleGroup => RunningExclusion::SameProjectAndModuleGroup,
        }
    }

    /// Select and claim the next job. Returns `None` when nothing is eligible.
    ///
    /// A lost claim re-runs the query, so the caller only sees a job it owns.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn next_job_id(
        self,
        store: &dyn JobStore,
        pools: &BTreeSet<EncryptionPoolId>,
        now_ms: u128,
    ) -> Result<Option<JobId>, StoreError> {
        loop {
            let Some(candidate) = store.next_ready(pools, self.exclusion()).await? else {
                return Ok(None);
            };
            if store.try_claim(candidate.id, candidate.version, now_ms).await? {
                info!(job_id = %candidate.id, strategy = self.id(), "claimed job");
                return Ok(Some(candidate.id));
            }
            debug!(
                job_id = %candidate.id,
                version = candidate.version,
                "claim lost, selecting again"
            );
        }
    }
}

impl fmt::Display for SchedulerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SchedulerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown scheduler strategy `{s}`"))
    }
}
