//! Cron Schedules
//!
//! Parses standard five-field cron expressions and computes fire times
//! in UTC.
//!
//! | field        | range |
//! |--------------|-------|
//! | minute       | 0-59  |
//! | hour         | 0-23  |
//! | day of month | 1-31  |
//! | month        | 1-12  |
//! | day of week  | 0-7 (0 and 7 are Sunday) |
//!
//! Each field accepts `*`, numbers, lists (`1,15`), ranges (`1-5`) and
//! steps (`*/15`, `0-30/10`). When both day fields are restricted a day
//! matches if either one does, as in Vixie cron.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{PipelineError, Result};

/// Days scanned before giving up on finding a fire time. Eight years
/// covers every leap-day and weekday combination.
const MAX_SCAN_DAYS: i64 = 366 * 8;

/// Allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    /// Parses a five-field expression. Surrounding whitespace is ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use dbtrunner::workflow::CronSchedule;
    ///
    /// let daily = CronSchedule::parse("0 3 * * * ").unwrap();
    /// let after = Utc.with_ymd_and_hms(2025, 1, 23, 12, 0, 0).unwrap();
    /// let next = daily.next_after(after).unwrap();
    /// assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 24, 3, 0, 0).unwrap());
    /// ```
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(schedule_error(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let parse = |index: usize, name: &str, min: u32, max: u32| {
            parse_field(fields[index], min, max)
                .map_err(|reason| schedule_error(expression, format!("{} field: {}", name, reason)))
        };

        let minutes = parse(0, "minute", 0, 59)?;
        let hours = parse(1, "hour", 0, 23)?;
        let days_of_month = parse(2, "day-of-month", 1, 31)?;
        let months = parse(3, "month", 1, 12)?;
        let mut days_of_week = parse(4, "day-of-week", 0, 7)?;

        // 7 is an alias for Sunday
        if days_of_week.contains(7) {
            days_of_week = FieldSet(days_of_week.0 | 1);
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            day_of_month_restricted: !fields[2].starts_with('*'),
            day_of_week_restricted: !fields[4].starts_with('*'),
        })
    }

    /// The normalized expression this schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns true if the schedule fires at `at` (seconds are ignored).
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.matches_day(at.date_naive())
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());

        if self.day_of_month_restricted && self.day_of_week_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First fire time strictly after `after`.
    ///
    /// Returns `None` if the expression can never fire (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = truncate_to_minute(after) + Duration::minutes(1);
        let start_date = start.date_naive();

        for offset in 0..MAX_SCAN_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.matches_day(date) {
                continue;
            }

            let first_day = offset == 0;
            for hour in 0..24 {
                if !self.hours.contains(hour) || (first_day && hour < start.hour()) {
                    continue;
                }
                for minute in 0..60 {
                    if !self.minutes.contains(minute) {
                        continue;
                    }
                    if first_day && hour == start.hour() && minute < start.minute() {
                        continue;
                    }
                    return Utc
                        .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
                        .single();
                }
            }
        }

        None
    }

    /// Up to `count` fire times strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    /// Fire times in the half-open interval `(after, until]`.
    pub fn between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut times = Vec::new();
        let mut cursor = after;
        while let Some(next) = self.next_after(cursor) {
            if next > until {
                break;
            }
            times.push(next);
            cursor = next;
        }
        times
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn schedule_error(expression: &str, reason: String) -> PipelineError {
    PipelineError::Schedule {
        expression: expression.to_string(),
        reason,
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<FieldSet, String> {
    let mut set = 0u64;

    for part in field.split(',') {
        if part.is_empty() {
            return Err("empty list entry".to_string());
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be greater than zero".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (low, high) = if range == "*" {
            (min, max)
        } else if let Some((low, high)) = range.split_once('-') {
            (parse_value(low, min, max)?, parse_value(high, min, max)?)
        } else {
            let value = parse_value(range, min, max)?;
            // "5/10" means "from 5 to the end, every 10"
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if low > high {
            return Err(format!("range {}-{} is reversed", low, high));
        }

        let mut value = low;
        while value <= high {
            set |= 1u64 << value;
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }

    Ok(FieldSet(set))
}

fn parse_value(raw: &str, min: u32, max: u32) -> std::result::Result<u32, String> {
    let value: u32 = raw.parse().map_err(|_| format!("invalid value '{}'", raw))?;
    if value < min || value > max {
        return Err(format!("value {} out of range {}-{}", value, min, max));
    }
    Ok(value)
}
