// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::OnceLock;
use std::time::Instant;

use time::OffsetDateTime;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic seconds, measured from the first clock read of the process.
/// Used for enqueue/start timestamps in telemetry.
pub fn monotonic() -> f64 {
    ANCHOR.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Wall-clock seconds since the unix epoch. Fire times and throttle
/// deadlines are expressed in this clock.
pub fn wall() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_goes_back() {
        let a = monotonic();
        let b = monotonic();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_is_epoch_seconds() {
        // 2020-01-01T00:00:00Z
        assert!(wall() > 1_577_836_800.0);
    }
}
