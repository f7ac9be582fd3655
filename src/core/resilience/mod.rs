//! Generic retry / fallthrough wrapper around fallible actions.
//!
//! A [`ResilientActionExecutor`] runs an action and, on failure, asks its
//! registered [`ResilienceConsultant`]s what to do. Consultants are asked
//! again after every failed attempt; only the fallthrough window is
//! remembered between calls.
//!
//! Use one executor per kind of remote target. A fallthrough window opened
//! because of target A must not short-circuit calls to target B.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use prometheus_scan_scheduler::core::resilience::{ResilientActionExecutor, RetryConsultant};
//!
//! let executor = ResilientActionExecutor::new()
//!     .with_consultant(RetryConsultant::new(3, Duration::from_millis(100)));
//! let job = executor.execute("load job", || store.find(id)).await?;
//! ```

pub mod consultant;
pub mod executor;

pub use consultant::{
    FallthroughConsultant, ResilienceCallback, ResilienceConsultant, ResilienceContext,
    ResilienceProposal, RetryConsultant,
};
pub use executor::ResilientActionExecutor;
