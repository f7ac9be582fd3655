//! # Prometheus Scan Scheduler
//!
//! Job orchestration core for a security-scan platform: a bounded execution
//! queue, a next-job resolver that is safe across several scheduler
//! instances sharing one job store, and a generic resilient action executor.
//!
//! ## Core Problem Solved
//!
//! Scan jobs are long running and expensive, and several scheduler instances
//! compete for the same job table:
//!
//! - **Bounded concurrency**: an instance never runs more than `queue_max` scans
//! - **Exactly-once claiming**: a version-checked claim guarantees one owner per job
//! - **Restart safety**: unfinished jobs are suspended on shutdown and resumed later
//! - **Flaky dependencies**: store and adapter calls are retried or short-circuited
//!
//! ## Execution Queue
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_scan_scheduler::config::ExecutionConfig;
//! use prometheus_scan_scheduler::core::ExecutionService;
//! use prometheus_scan_scheduler::infra::InMemoryJobStore;
//! use prometheus_scan_scheduler::runtime::TokioSpawner;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let service = ExecutionService::new(
//!     ExecutionConfig::default(),
//!     my_task_factory,           // implements TaskFactory
//!     store.clone(),
//!     TokioSpawner::current()?,
//! )?;
//! service.start_watcher();
//!
//! if !service.is_queue_full() {
//!     service.add_to_execution_queue(&job).await?;
//! }
//! let status = service.execution_status();
//! ```
//!
//! ## Whole Engine
//!
//! ```rust,ignore
//! use prometheus_scan_scheduler::builders::build_engine;
//! use prometheus_scan_scheduler::config::EngineConfig;
//!
//! let engine = build_engine(&EngineConfig::from_env()?, store, pools, factory, spawner, None)?;
//! let trigger = engine.start();
//! // ...
//! engine.shutdown().await?;
//! ```
//!
//! For complete examples, see:
//! - `tests/execution_queue_test.rs` - queue capacity, cancel and shutdown
//! - `tests/resolver_test.rs` - strategies and concurrent claiming

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions.
pub mod core;
/// Configuration models for the queue, resolver, trigger and resilience.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for job storage.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
