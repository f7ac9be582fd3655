//! Tests for utility functions

use prometheus_scan_scheduler::util::{elapsed_ms, init_tracing_with_default, now_ms};

#[test]
fn test_clock_is_monotonic_enough() {
    let first = now_ms();
    let second = now_ms();
    assert!(second >= first);
    assert_eq!(elapsed_ms(first, first + 25), 25);
}

#[test]
fn test_tracing_init_is_idempotent() {
    init_tracing_with_default("prometheus_scan_scheduler=debug");
    init_tracing_with_default("prometheus_scan_scheduler=info");
    tracing::info!(component = "util_test", "tracing initialized");
}
