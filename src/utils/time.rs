use chrono::{DateTime, Duration, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds left on a countdown that began at `started_at`, never negative.
///
/// Derived from the persisted start so a reloaded client sees the same
/// remaining time as one that never went away.
pub fn remaining_seconds(started_at: DateTime<Utc>, duration: Duration, now: DateTime<Utc>) -> i64 {
    let elapsed = now - started_at;
    (duration - elapsed).num_seconds().max(0)
}
