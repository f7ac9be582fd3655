//! Configuration models for the execution queue, resolver, trigger and resilience.

pub mod engine;

pub use engine::{EngineConfig, ExecutionConfig, ResilienceConfig, ResolverConfig, TriggerConfig};
