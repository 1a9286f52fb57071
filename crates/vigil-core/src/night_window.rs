//! The nightly wall-clock window in which automated runs are permitted.
//!
//! A pure time predicate: no I/O, no clock reads — callers pass `now`
//! explicitly so the logic is deterministically testable across midnight
//! wrap-around.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

/// A wall-clock interval, e.g. 20:00–07:00. `start` may be after `end`,
/// meaning the window wraps across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl NightWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// Does the window contain wall-clock instant `t`?
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let tod = t.time();
        if self.wraps() {
            tod >= self.start || tod < self.end
        } else {
            tod >= self.start && tod < self.end
        }
    }

    /// The timezone-aware datetime of the next `end` at or after `t`.
    ///
    /// For a wrapping window (start > end): if `t`'s time-of-day is at or
    /// after `start`, the end falls on the *next* calendar day; otherwise
    /// (we're already past midnight, before `end`) it falls on today.
    ///
    /// For a non-wrapping window (start <= end): the end is always today at
    /// or after `t`.
    pub fn end_for(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let tod = t.time();

        let end_date = if self.wraps() {
            if tod >= self.start {
                date + chrono::Duration::days(1)
            } else {
                date
            }
        } else {
            date
        };

        let naive = end_date.and_time(self.end);
        Utc.from_utc_datetime(&naive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    fn nightly() -> NightWindow {
        NightWindow::new(
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        )
    }

    #[test]
    fn contains_inside_wrap_window() {
        let w = nightly();
        assert!(w.contains(dt(2025, 1, 15, 2, 30)));
        assert!(w.contains(dt(2025, 1, 15, 23, 0)));
        assert!(!w.contains(dt(2025, 1, 15, 12, 0)));
        assert!(!w.contains(dt(2025, 1, 15, 7, 0)));
        assert!(w.contains(dt(2025, 1, 15, 20, 0)));
    }

    #[test]
    fn end_for_before_midnight_uses_tomorrow() {
        let w = nightly();
        // At 23:00, we're before start? no — 23:00 >= 20:00, so end is tomorrow 07:00.
        let end = w.end_for(dt(2025, 1, 15, 23, 0));
        assert_eq!(end, dt(2025, 1, 16, 7, 0));
    }

    #[test]
    fn end_for_after_midnight_uses_today() {
        let w = nightly();
        let end = w.end_for(dt(2025, 1, 15, 2, 30));
        assert_eq!(end, dt(2025, 1, 15, 7, 0));
    }

    #[test]
    fn non_wrapping_window_end_is_always_today() {
        let w = NightWindow::new(
            NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
        );
        assert!(w.contains(dt(2025, 1, 15, 3, 0)));
        assert!(!w.contains(dt(2025, 1, 15, 6, 0)));
        let end = w.end_for(dt(2025, 1, 15, 3, 0));
        assert_eq!(end, dt(2025, 1, 15, 5, 0));
    }

    #[test]
    fn outside_window_is_rejected() {
        let w = nightly();
        assert!(!w.contains(dt(2025, 1, 15, 12, 0)));
    }
}
