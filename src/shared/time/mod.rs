//! Elapsed-time helpers shared by the transport log and the latency prober.

use chrono::{DateTime, Local};
use std::time::Duration;

/// Rounds a duration to the nearest whole millisecond, floored at zero.
pub fn round_millis(d: Duration) -> u64 {
    let ms = (d.as_secs_f64() * 1000.0).round();
    if ms <= 0.0 {
        0
    } else {
        ms as u64
    }
}

/// Milliseconds with one decimal of precision (e.g. `12.3`).
pub fn millis_one_decimal(d: Duration) -> f64 {
    (d.as_secs_f64() * 10_000.0).round() / 10.0
}

/// Formats a wall-clock instant as `HH:MM:SS.mmm`.
pub fn stamp(at: &DateTime<Local>) -> String {
    at.format("%H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rounds_to_nearest_millisecond() {
        assert_eq!(round_millis(Duration::from_micros(1_499)), 1);
        assert_eq!(round_millis(Duration::from_micros(1_600)), 2);
        assert_eq!(round_millis(Duration::ZERO), 0);
        assert_eq!(round_millis(Duration::from_micros(300)), 0);
    }

    #[test]
    fn keeps_one_decimal() {
        assert_eq!(millis_one_decimal(Duration::from_micros(12_345)), 12.3);
        assert_eq!(millis_one_decimal(Duration::from_micros(12_360)), 12.4);
        assert_eq!(millis_one_decimal(Duration::from_millis(2)), 2.0);
    }

    #[test]
    fn stamp_has_millisecond_precision() {
        let at = Local
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .unwrap()
            + chrono::Duration::milliseconds(67);
        assert_eq!(stamp(&at), "03:04:05.067");
    }
}
