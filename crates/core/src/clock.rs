//! Time source and instant arithmetic for reclaim decisions.
//!
//! A pass reads [`Clock::now`] once and passes the instant down, so every
//! comparison inside one pass is made against the same "now".

use chrono::{DateTime, Duration, Utc};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant. Used by tests and by the `RECLAIM_NOW`
/// override.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// `instant + duration`, or `None` if the result is out of range.
pub fn add_duration(instant: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    instant.checked_add_signed(duration)
}

/// Whether `now` is at or past `instant`.
pub fn has_reached(now: DateTime<Utc>, instant: DateTime<Utc>) -> bool {
    now >= instant
}

/// Round up to the next whole second. Whole seconds are returned unchanged.
pub fn ceil_to_second(instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let subsec = instant.timestamp_subsec_nanos();
    if subsec == 0 {
        return Some(instant);
    }
    instant
        .checked_sub_signed(Duration::nanoseconds(i64::from(subsec)))?
        .checked_add_signed(Duration::seconds(1))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, nanos).unwrap()
    }

    #[test]
    fn fixed_clock_returns_pinned_instant() {
        let instant = at(1_700_000_000, 0);
        assert_eq!(FixedClock(instant).now(), instant);
    }

    #[test]
    fn add_duration_detects_overflow() {
        assert_eq!(
            add_duration(at(0, 0), Duration::hours(1)),
            Some(at(3600, 0))
        );
        assert_eq!(add_duration(DateTime::<Utc>::MAX_UTC, Duration::seconds(1)), None);
    }

    #[test]
    fn has_reached_is_inclusive() {
        assert!(has_reached(at(10, 0), at(10, 0)));
        assert!(has_reached(at(11, 0), at(10, 0)));
        assert!(!has_reached(at(9, 999_999_999), at(10, 0)));
    }

    #[test]
    fn ceil_to_second_rounds_up() {
        assert_eq!(ceil_to_second(at(10, 0)), Some(at(10, 0)));
        assert_eq!(ceil_to_second(at(10, 1)), Some(at(11, 0)));
        assert_eq!(ceil_to_second(at(10, 999_999_999)), Some(at(11, 0)));
    }
}
