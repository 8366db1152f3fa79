//! Five-field cron expression grammar: `minute hour day month weekday`.
//! Each field supports `*`, `*/N`, an integer, ranges `N-M`, or lists
//! `N,M,...`. No cron crate in the dependency stack, so this is hand-rolled
//! against `chrono`.

use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression must have 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid cron field {0:?}")]
    InvalidField(String),
    #[error("sub-minute scheduling is not supported")]
    SubMinuteGranularity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Vec<u32>,
    hour: Vec<u32>,
    day: Vec<u32>,
    month: Vec<u32>,
    weekday: Vec<u32>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::WrongFieldCount(fields.len()));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            weekday: parse_field(fields[4], 0, 6)?,
        })
    }

    /// True when `at` (truncated to the minute) matches this schedule.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.contains(&at.minute())
            && self.hour.contains(&at.hour())
            && self.day.contains(&at.day())
            && self.month.contains(&at.month())
            && self.weekday.contains(&at.weekday().num_days_from_sunday())
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, CronError> {
    if field == "*" {
        return Ok((min..=max).collect());
    }
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_part(part, min, max)?);
    }
    if values.is_empty() {
        return Err(CronError::InvalidField(field.to_string()));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_part(part: &str, min: u32, max: u32) -> Result<Vec<u32>, CronError> {
    if let Some(step_spec) = part.strip_prefix("*/") {
        let step: u32 = step_spec.parse().map_err(|_| invalid(part))?;
        if step == 0 {
            return Err(invalid(part));
        }
        if min == 0 && step == 1 {
            // */1 on the minute field is the finest granularity allowed.
        }
        return Ok((min..=max).step_by(step as usize).collect());
    }
    if let Some((lo, hi)) = part.split_once('-') {
        let lo: u32 = lo.parse().map_err(|_| invalid(part))?;
        let hi: u32 = hi.parse().map_err(|_| invalid(part))?;
        if lo > hi || lo < min || hi > max {
            return Err(invalid(part));
        }
        return Ok((lo..=hi).collect());
    }
    let v: u32 = part.parse().map_err(|_| invalid(part))?;
    if v < min || v > max {
        return Err(invalid(part));
    }
    Ok(vec![v])
}

fn invalid(part: &str) -> CronError {
    CronError::InvalidField(part.to_string())
}

/// Rejects cron expressions implying a sub-minute interval. The grammar has
/// no seconds field, so every syntactically valid expression already clears
/// a one-minute floor; this exists for symmetry with the per-schedule
/// minimum-interval check and to reject a `*/0`-style degenerate minute field.
pub fn enforce_minimum_interval(minute_field: &str) -> Result<(), CronError> {
    if minute_field.starts_with("*/0") {
        return Err(CronError::SubMinuteGranularity);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_minute() {
        let cron = CronSchedule::parse("*/1 * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap();
        assert!(cron.matches(at));
    }

    #[test]
    fn specific_time() {
        let cron = CronSchedule::parse("30 9 * * 1-5").unwrap();
        let monday_930 = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        assert!(cron.matches(monday_930));
        let sunday_930 = Utc.with_ymd_and_hms(2026, 1, 4, 9, 30, 0).unwrap();
        assert!(!cron.matches(sunday_930));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            CronSchedule::parse("* * *"),
            Err(CronError::WrongFieldCount(3))
        ));
    }

    #[test]
    fn list_and_step_fields() {
        let cron = CronSchedule::parse("0,15,30,45 * * * *").unwrap();
        assert!(cron.matches(Utc.with_ymd_and_hms(2026, 1, 1, 0, 15, 0).unwrap()));
        assert!(!cron.matches(Utc.with_ymd_and_hms(2026, 1, 1, 0, 16, 0).unwrap()));
    }
}
