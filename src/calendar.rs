//! Working-time arithmetic
//!
//! Translates between elapsed work minutes and wall-clock time, skipping
//! nights, weekends, holidays and breaks. `add_work_minutes` and
//! `work_minutes_between` are exact inverses of each other.

use crate::config::CalendarConfig;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};

/// Floating-point tolerance, in minutes, that terminates segment consumption
const MINUTE_EPSILON: f64 = 1e-6;

/// Calendar-aware time arithmetic over a fixed shift configuration
#[derive(Debug, Clone)]
pub struct WorkCalendar {
    config: CalendarConfig,
}

fn minutes_to_duration(minutes: f64) -> Duration {
    Duration::microseconds((minutes * 60_000_000.0).round() as i64)
}

fn duration_to_minutes(duration: Duration) -> f64 {
    duration.num_microseconds().unwrap_or(i64::MAX) as f64 / 60_000_000.0
}

impl WorkCalendar {
    pub fn new(config: CalendarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    /// A date is workable when it is a weekday and not a holiday
    pub fn is_workday(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            && !self.config.holidays.contains(&date)
    }

    /// Smallest workday on or after `date`
    pub fn next_workday(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        while !self.is_workday(day) {
            day += Duration::days(1);
        }
        day
    }

    /// Move `moment` forward to the next instant inside working time
    ///
    /// The result is on a workday, within `[work_start, work_end)` and not
    /// inside a break. A moment at or past `work_end` jumps to the next
    /// workday's `work_start`; a moment inside a break jumps to its end.
    pub fn snap_to_working(&self, moment: NaiveDateTime) -> NaiveDateTime {
        let work_date = self.next_workday(moment.date());
        if work_date != moment.date() {
            return work_date.and_time(self.config.work_start);
        }
        if moment.time() < self.config.work_start {
            return work_date.and_time(self.config.work_start);
        }
        if moment.time() >= self.config.work_end {
            let next_day = self.next_workday(work_date + Duration::days(1));
            return next_day.and_time(self.config.work_start);
        }
        for (break_start, break_end) in &self.config.breaks {
            if *break_start <= moment.time() && moment.time() < *break_end {
                return work_date.and_time(*break_end);
            }
        }
        moment
    }

    /// End of the uninterrupted work segment containing `moment`: the sooner
    /// of the next break start and the end of the shift
    fn segment_end(&self, moment: NaiveDateTime) -> NaiveDateTime {
        let mut end = moment.date().and_time(self.config.work_end);
        for (break_start, _) in &self.config.breaks {
            let boundary = moment.date().and_time(*break_start);
            if moment < boundary && boundary < end {
                end = boundary;
            }
        }
        end
    }

    /// Advance `start` by `minutes` of working time
    ///
    /// Snaps `start` first, then consumes whole work segments until the
    /// remainder fits inside one. `minutes <= 0` returns the snapped instant.
    pub fn add_work_minutes(&self, start: NaiveDateTime, minutes: f64) -> NaiveDateTime {
        let mut current = self.snap_to_working(start);
        let mut remaining = minutes;
        while remaining > MINUTE_EPSILON {
            let segment_end = self.segment_end(current);
            let available = duration_to_minutes(segment_end - current);
            if available >= remaining {
                current += minutes_to_duration(remaining);
                remaining = 0.0;
            } else {
                remaining -= available;
                current = self.snap_to_working(segment_end);
            }
        }
        current
    }

    /// Working minutes elapsed between two instants
    ///
    /// The exact inverse of [`add_work_minutes`](Self::add_work_minutes):
    /// nights, weekends, holidays and breaks contribute nothing.
    pub fn work_minutes_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> f64 {
        if start >= end {
            return 0.0;
        }
        let mut current = self.snap_to_working(start);
        if current >= end {
            return 0.0;
        }
        let mut total = 0.0;
        while current < end {
            let segment_end = self.segment_end(current).min(end);
            if segment_end > current {
                total += duration_to_minutes(segment_end - current);
            }
            if segment_end >= end {
                break;
            }
            current = self.snap_to_working(segment_end);
        }
        total
    }

    /// Workdays in `[start.date, end.date]`, both inclusive
    pub fn count_workdays(&self, start: NaiveDateTime, end: NaiveDateTime) -> u32 {
        if start.date() > end.date() {
            return 0;
        }
        let mut days = 0;
        let mut date = start.date();
        while date <= end.date() {
            if self.is_workday(date) {
                days += 1;
            }
            date += Duration::days(1);
        }
        days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use std::collections::BTreeSet;

    fn calendar() -> WorkCalendar {
        WorkCalendar::new(CalendarConfig::default())
    }

    fn calendar_with_holiday(date: NaiveDate) -> WorkCalendar {
        let mut holidays = BTreeSet::new();
        holidays.insert(date);
        WorkCalendar::new(
            CalendarConfig::new(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                vec![(
                    NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                )],
                holidays,
            )
            .unwrap(),
        )
    }

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_weekend_is_not_workday() {
        let cal = calendar();
        // 2026-03-07 is a Saturday
        assert!(!cal.is_workday(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()));
        assert!(cal.is_workday(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()));
    }

    #[test]
    fn test_snap_past_shift_end_jumps_to_next_workday() {
        let cal = calendar();
        // Friday 18:30 snaps to Monday 08:00
        let snapped = cal.snap_to_working(dt(2026, 3, 6, 18, 30));
        assert_eq!(snapped, dt(2026, 3, 9, 8, 0));
    }

    #[test]
    fn test_snap_inside_break_jumps_to_break_end() {
        let cal = calendar();
        assert_eq!(
            cal.snap_to_working(dt(2026, 3, 9, 12, 20)),
            dt(2026, 3, 9, 13, 0)
        );
    }

    #[test]
    fn test_add_zero_minutes_returns_snapped_instant() {
        let cal = calendar();
        assert_eq!(
            cal.add_work_minutes(dt(2026, 3, 9, 7, 0), 0.0),
            dt(2026, 3, 9, 8, 0)
        );
    }

    #[test]
    fn test_add_minutes_spans_break() {
        let cal = calendar();
        // 11:30 + 60 work minutes lands at 13:30, the break contributes nothing
        assert_eq!(
            cal.add_work_minutes(dt(2026, 3, 9, 11, 30), 60.0),
            dt(2026, 3, 9, 13, 30)
        );
    }

    #[test]
    fn test_add_minutes_spans_weekend_and_holiday() {
        // Friday 14:00 + 480 min with Monday 2026-03-09 as a holiday:
        // 180 on Friday, 240 on Tuesday morning, 60 after the Tuesday break
        let cal = calendar_with_holiday(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(
            cal.add_work_minutes(dt(2026, 3, 6, 14, 0), 480.0),
            dt(2026, 3, 10, 14, 0)
        );
    }

    #[test]
    fn test_minutes_between_skips_non_working_time() {
        let cal = calendar_with_holiday(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        let minutes = cal.work_minutes_between(dt(2026, 3, 6, 14, 0), dt(2026, 3, 10, 14, 0));
        assert!((minutes - 480.0).abs() < 1e-3);
        // nothing accrues across the weekend and holiday alone
        assert_eq!(
            cal.work_minutes_between(dt(2026, 3, 6, 17, 0), dt(2026, 3, 10, 8, 0)),
            0.0
        );
    }

    #[test]
    fn test_between_is_inverse_of_add() {
        let cal = calendar();
        let origin = dt(2026, 3, 9, 8, 0);
        for minutes in [0.5, 7.25, 59.0, 240.0, 480.0, 1234.5] {
            let end = cal.add_work_minutes(origin, minutes);
            let measured = cal.work_minutes_between(origin, end);
            assert!(
                (measured - minutes).abs() < 1e-3,
                "round trip of {} gave {}",
                minutes,
                measured
            );
        }
    }

    #[test]
    fn test_count_workdays_inclusive() {
        let cal = calendar_with_holiday(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        // Friday through Tuesday: Friday + Tuesday only
        assert_eq!(cal.count_workdays(dt(2026, 3, 6, 9, 0), dt(2026, 3, 10, 9, 0)), 2);
        assert_eq!(cal.count_workdays(dt(2026, 3, 10, 9, 0), dt(2026, 3, 6, 9, 0)), 0);
    }
}
