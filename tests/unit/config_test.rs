//! Tests for configuration validation

use prometheus_scan_scheduler::config::{EngineConfig, ExecutionConfig, TriggerConfig};
use prometheus_scan_scheduler::core::SchedulerStrategy;

#[test]
fn test_engine_config_from_json() {
    let cfg = EngineConfig::from_json_str(
        r#"{
            "execution": { "queue_max": 10, "watcher_interval_ms": 500 },
            "resolver": { "strategy": "only-one-scan-per-project-and-module-group" },
            "trigger": { "job_processing_enabled": false }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.execution.queue_max, 10);
    assert_eq!(cfg.execution.watcher_interval_ms, 500);
    assert_eq!(cfg.execution.watcher_initial_delay_ms, 300);
    assert_eq!(cfg.resolver.strategy, SchedulerStrategy::OneScanPerProjectAndModuleGroup);
    assert!(!cfg.trigger.job_processing_enabled);
    assert_eq!(cfg.resilience.max_retries, 3);
}

#[test]
fn test_engine_config_unknown_strategy() {
    let err =
        EngineConfig::from_json_str(r#"{"resolver":{"strategy":"round-robin"}}"#).unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_execution_config_invalid_interval() {
    let invalid = ExecutionConfig {
        watcher_interval_ms: 0,
        ..ExecutionConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_trigger_config_invalid_delay() {
    let invalid = TriggerConfig {
        delay_ms: 0,
        ..TriggerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_engine_config_from_lookup_with_jitter() {
    let cfg = EngineConfig::from_lookup(|key| match key {
        "SCHEDULER_TRIGGER_JITTER_MS" => Some("250".into()),
        "SCHEDULER_RESILIENCE_FALLTHROUGH_MS" => Some("1000".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.trigger.jitter_ms, 250);
    assert_eq!(cfg.resilience.fallthrough_ms, 1_000);
    assert_eq!(cfg.resilience.build_store_executor().consultant_count(), 2);
}
