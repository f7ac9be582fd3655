//! Wall-clock helpers. All timestamps in this crate are milliseconds since
//! the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since epoch.
///
/// A clock set before the epoch yields `0` instead of failing.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Milliseconds elapsed between `since_ms` and `now_ms`, saturating at zero.
#[must_use]
pub const fn elapsed_ms(since_ms: u128, now_ms: u128) -> u128 {
    now_ms.saturating_sub(since_ms)
}
