//! Next-job resolution and the periodic trigger that feeds the execution queue.
//!
//! Several scheduler instances may share one job store. Selection is a plain
//! query; exclusivity comes only from the version-checked claim, so a lost
//! claim just means another instance was faster and the query is repeated.

pub mod pools;
pub mod resolver;
pub mod strategy;
pub mod trigger;

pub use pools::{EncryptionPoolProvider, StaticPoolProvider};
pub use resolver::SchedulerNextJobResolver;
pub use strategy::SchedulerStrategy;
pub use trigger::{SchedulerTrigger, TriggerHandle, TriggerOutcome};
