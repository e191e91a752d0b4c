use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Slack (ms) subtracted from the next tick boundary when deciding what is due.
pub const HORIZON_EPSILON_MS: i64 = 1;

/// First tick boundary strictly after `now`.
///
/// Boundaries are multiples of `period` since the Unix epoch, so with a
/// one-minute period every boundary lands on `:00` seconds.
pub fn next_tick_boundary(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
    let now_ms = now.timestamp_millis();
    let next_ms = now_ms
        .div_euclid(period_ms)
        .saturating_add(1)
        .saturating_mul(period_ms);
    DateTime::from_timestamp_millis(next_ms).unwrap_or(now)
}

/// Latest fire time a sweep at `now` treats as due: anything strictly before
/// the next tick.
pub fn sweep_horizon(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    next_tick_boundary(now, period) - TimeDelta::milliseconds(HORIZON_EPSILON_MS)
}

/// How long to wait from `now` until the first aligned tick.
pub fn initial_delay(now: DateTime<Utc>, period: Duration) -> Duration {
    (next_tick_boundary(now, period) - now)
        .to_std()
        .unwrap_or(period)
}
