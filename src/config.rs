//! Working-calendar configuration
//!
//! Parses and validates the caller-provided calendar description (HH:MM
//! strings, ISO dates) into a typed configuration. Invalid input is rejected
//! here, before the simulation seeds.

use crate::error::{ScheduleError, ScheduleResult};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Calendar configuration as supplied at the boundary, in its string form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCalendarConfig {
    /// Shift start, "HH:MM"
    pub work_start_time: String,
    /// Shift end, "HH:MM"
    pub work_end_time: String,
    /// Daily breaks
    #[serde(default)]
    pub breaks: Vec<RawBreak>,
    /// Holiday dates, "YYYY-MM-DD"
    #[serde(default)]
    pub holidays: Vec<String>,
}

/// One daily break window, "HH:MM" bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBreak {
    pub start: String,
    pub end: String,
}

/// Validated working-calendar configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Time of day the shift opens
    pub work_start: NaiveTime,
    /// Time of day the shift closes
    pub work_end: NaiveTime,
    /// Daily breaks, ordered by start time, non-overlapping, inside the shift
    pub breaks: Vec<(NaiveTime, NaiveTime)>,
    /// Non-working dates in addition to weekends
    pub holidays: BTreeSet<NaiveDate>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            breaks: vec![(
                NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
                NaiveTime::from_hms_opt(13, 0, 0).unwrap_or(NaiveTime::MIN),
            )],
            holidays: BTreeSet::new(),
        }
    }
}

impl CalendarConfig {
    /// Build a validated configuration from typed parts
    pub fn new(
        work_start: NaiveTime,
        work_end: NaiveTime,
        mut breaks: Vec<(NaiveTime, NaiveTime)>,
        holidays: BTreeSet<NaiveDate>,
    ) -> ScheduleResult<Self> {
        breaks.sort_by_key(|b| b.0);
        let config = Self {
            work_start,
            work_end,
            breaks,
            holidays,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate the raw boundary form
    pub fn from_raw(raw: &RawCalendarConfig) -> ScheduleResult<Self> {
        let work_start = parse_time(&raw.work_start_time)?;
        let work_end = parse_time(&raw.work_end_time)?;
        let mut breaks = Vec::with_capacity(raw.breaks.len());
        for b in &raw.breaks {
            breaks.push((parse_time(&b.start)?, parse_time(&b.end)?));
        }
        let mut holidays = BTreeSet::new();
        for h in &raw.holidays {
            if !holidays.insert(parse_date(h)?) {
                warn!(holiday = %h, "duplicate holiday in configuration");
            }
        }
        Self::new(work_start, work_end, breaks, holidays)
    }

    fn validate(&self) -> ScheduleResult<()> {
        if self.work_start >= self.work_end {
            return Err(ScheduleError::Configuration(format!(
                "work day must start before it ends ({} >= {})",
                self.work_start, self.work_end
            )));
        }
        let mut previous_end: Option<NaiveTime> = None;
        for (start, end) in &self.breaks {
            if start >= end {
                return Err(ScheduleError::Configuration(format!(
                    "break must start before it ends ({} >= {})",
                    start, end
                )));
            }
            if *start < self.work_start || *end > self.work_end {
                return Err(ScheduleError::Configuration(format!(
                    "break {}-{} falls outside the work day",
                    start, end
                )));
            }
            if let Some(prev) = previous_end {
                if *start < prev {
                    return Err(ScheduleError::Configuration(format!(
                        "break starting at {} overlaps the previous break",
                        start
                    )));
                }
            }
            previous_end = Some(*end);
        }
        Ok(())
    }
}

/// Parse an "HH:MM" time-of-day string
pub fn parse_time(value: &str) -> ScheduleResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(value.to_string()))
}

/// Parse a "YYYY-MM-DD" date string
pub fn parse_date(value: &str) -> ScheduleResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::InvalidDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_config() {
        let raw = RawCalendarConfig {
            work_start_time: "08:00".to_string(),
            work_end_time: "17:00".to_string(),
            breaks: vec![RawBreak {
                start: "12:00".to_string(),
                end: "13:00".to_string(),
            }],
            holidays: vec!["2026-12-25".to_string()],
        };
        let config = CalendarConfig::from_raw(&raw).unwrap();
        assert_eq!(config.work_start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(config.breaks.len(), 1);
        assert!(config
            .holidays
            .contains(&NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()));
    }

    #[test]
    fn test_invalid_time_string_rejected() {
        let raw = RawCalendarConfig {
            work_start_time: "8 o'clock".to_string(),
            work_end_time: "17:00".to_string(),
            breaks: vec![],
            holidays: vec![],
        };
        assert!(matches!(
            CalendarConfig::from_raw(&raw),
            Err(ScheduleError::InvalidTime(_))
        ));
    }

    #[test]
    fn test_inverted_work_day_rejected() {
        let result = CalendarConfig::new(
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            vec![],
            BTreeSet::new(),
        );
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }

    #[test]
    fn test_overlapping_breaks_rejected() {
        let result = CalendarConfig::new(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            vec![
                (
                    NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                ),
                (
                    NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
                    NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                ),
            ],
            BTreeSet::new(),
        );
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }
}
