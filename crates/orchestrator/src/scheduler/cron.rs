//! Cron expression parsing and evaluation.
//!
//! Supports the standard 5-field format `minute hour day month weekday` and
//! a 6-field format with a leading `second` field. Each field accepts `*`,
//! single values, ranges (`1-5`), steps (`*/15`, `10-40/10`, `5/20`) and
//! comma-separated lists of those. Months and weekdays also accept
//! three-letter names; weekday `7` is Sunday. The usual `@hourly`, `@daily`,
//! `@weekly`, `@monthly` and `@yearly` shorthands are recognised.
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either field matches.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone,
    Timelike, Utc,
};

/// How far ahead `next_after` searches before giving up.
const SEARCH_YEARS: i32 = 8;

/// Cron and timezone parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("cron expression must have 5 or 6 fields, got {count}: '{expr}'")]
    FieldCount { count: usize, expr: String },

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid timezone '{0}': expected UTC or an offset like +02:00")]
    InvalidTimezone(String),
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first name
    name_base: u32,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    name_base: 1,
};
// 7 is accepted and folded onto 0 (Sunday)
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    name_base: 0,
};

/// Allowed values of one field as a bitmask (all fields fit in 64 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    /// Smallest allowed value >= `value`
    fn next_from(self, value: u32) -> Option<u32> {
        if value >= 64 {
            return None;
        }
        let masked = self.0 & (u64::MAX << value);
        (masked != 0).then(|| masked.trailing_zeros())
    }

    fn first(self) -> Option<u32> {
        self.next_from(0)
    }
}

/// A parsed cron schedule bound to a timezone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    timezone: FixedOffset,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse an expression evaluated in UTC
    ///
    /// # Examples
    ///
    /// - `0 0 * * *` - daily at midnight
    /// - `*/5 * * * *` - every 5 minutes
    /// - `0 9-17 * * MON-FRI` - hourly 9am-5pm on weekdays
    /// - `*/30 * * * * *` - every 30 seconds
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        Self::parse_in(expr, utc_offset())
    }

    /// Parse an expression evaluated in the given timezone (`UTC`, `+05:30`, ...)
    pub fn parse_with_timezone(expr: &str, timezone: &str) -> Result<Self, CronError> {
        Self::parse_in(expr, parse_timezone(timezone)?)
    }

    fn parse_in(expr: &str, timezone: FixedOffset) -> Result<Self, CronError> {
        let expanded = match expr.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        let (second, rest) = match parts.len() {
            5 => ("0", &parts[..]),
            6 => (parts[0], &parts[1..]),
            count => {
                return Err(CronError::FieldCount {
                    count,
                    expr: expr.to_string(),
                })
            }
        };

        let mut days_of_week = parse_field(&DAY_OF_WEEK, rest[4])?;
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 & !(1 << 7)) | 1);
        }

        Ok(Self {
            source: expr.trim().to_string(),
            timezone,
            seconds: parse_field(&SECOND, second)?,
            minutes: parse_field(&MINUTE, rest[0])?,
            hours: parse_field(&HOUR, rest[1])?,
            days_of_month: parse_field(&DAY_OF_MONTH, rest[2])?,
            months: parse_field(&MONTH, rest[3])?,
            days_of_week,
            dom_restricted: !rest[2].starts_with('*'),
            dow_restricted: !rest[4].starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Whether `time` (truncated to the second) is a fire time
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        let local = time.with_timezone(&self.timezone).naive_local();
        self.months.contains(local.month())
            && self.day_matches(local.date())
            && self.hours.contains(local.hour())
            && self.minutes.contains(local.minute())
            && self.seconds.contains(local.second())
    }

    /// The first fire time strictly after `after`
    ///
    /// Returns `None` when no fire time exists within the search horizon
    /// (for example `0 0 30 2 *`).
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone).naive_local();
        let mut t = local.with_nanosecond(0)? + Duration::seconds(1);
        let last_year = t.year() + SEARCH_YEARS;

        while t.year() <= last_year {
            if !self.months.contains(t.month()) {
                t = self.next_month_start(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = start_of_day(t.date().succ_opt()?)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = match self.hours.next_from(t.hour()) {
                    Some(hour) => t.date().and_hms_opt(hour, 0, 0)?,
                    None => start_of_day(t.date().succ_opt()?)?,
                };
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = match self.minutes.next_from(t.minute()) {
                    Some(minute) => t.date().and_hms_opt(t.hour(), minute, 0)?,
                    None => t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1),
                };
                continue;
            }
            if !self.seconds.contains(t.second()) {
                t = match self.seconds.next_from(t.second()) {
                    Some(second) => t.with_second(second)?,
                    None => t.with_second(0)? + Duration::minutes(1),
                };
                continue;
            }

            return self
                .timezone
                .from_local_datetime(&t)
                .single()
                .map(|fire| fire.with_timezone(&Utc));
        }
        None
    }

    /// The next `count` fire times after `after`
    pub fn upcoming(&self, after: &DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = *after;
        while times.len() < count {
            let Some(next) = self.next_after(&cursor) else {
                break;
            };
            times.push(next);
            cursor = next;
        }
        times
    }

    fn next_month_start(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let (year, month) = match self.months.next_from(t.month() + 1) {
            Some(month) if month <= 12 => (t.year(), month),
            _ => (t.year() + 1, self.months.first()?),
        };
        start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?)
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn start_of_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Parse `UTC`/`Z`/`GMT` or a fixed offset `±HH:MM` / `±HHMM` / `±HH`
pub fn parse_timezone(tz: &str) -> Result<FixedOffset, CronError> {
    let trimmed = tz.trim();
    let upper = trimmed.to_ascii_uppercase();
    let offset = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    if offset.is_empty() || offset == "Z" {
        return Ok(utc_offset());
    }

    let invalid = || CronError::InvalidTimezone(tz.to_string());
    let (sign, digits) = match offset.as_bytes().first() {
        Some(b'+') => (1, &offset[1..]),
        Some(b'-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn parse_field(spec: &FieldSpec, text: &str) -> Result<FieldSet, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: spec.name,
        value: text.to_string(),
        reason,
    };

    let mut bits = 0u64;
    for item in text.split(',') {
        if item.is_empty() {
            return Err(invalid("empty list item".to_string()));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("invalid step '{step}'")))?;
                if step == 0 {
                    return Err(invalid("step must be at least 1".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(spec, a, &invalid)?, parse_value(spec, b, &invalid)?)
        } else {
            let value = parse_value(spec, range, &invalid)?;
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        if start > end {
            return Err(invalid(format!("range {start}-{end} is reversed")));
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            bits |= 1 << value;
        }
    }
    Ok(FieldSet(bits))
}

fn parse_value(
    spec: &FieldSpec,
    text: &str,
    invalid: &impl Fn(String) -> CronError,
) -> Result<u32, CronError> {
    let value = match spec
        .names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
    {
        Some(index) => spec.name_base + index as u32,
        None => text
            .parse::<u32>()
            .map_err(|_| invalid(format!("'{text}' is not a number")))?,
    };
    if value < spec.min || value > spec.max {
        return Err(invalid(format!(
            "{value} is outside {}-{}",
            spec.min, spec.max
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn next(expr: &str, after: &str) -> Option<DateTime<Utc>> {
        CronSchedule::parse(expr).unwrap().next_after(&at(after))
    }

    #[test]
    fn test_every_fifteen_minutes() {
        assert_eq!(
            next("*/15 * * * *", "2024-03-10T10:07:30Z"),
            Some(at("2024-03-10T10:15:00Z"))
        );
        assert_eq!(
            next("*/15 * * * *", "2024-03-10T10:45:00Z"),
            Some(at("2024-03-10T11:00:00Z"))
        );
    }

    #[test]
    fn test_strictly_after() {
        assert_eq!(
            next("0 0 * * *", "2024-03-10T00:00:00Z"),
            Some(at("2024-03-11T00:00:00Z"))
        );
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        // 2024-03-09 is a Saturday
        assert_eq!(
            next("0 9 * * 1-5", "2024-03-09T12:00:00Z"),
            Some(at("2024-03-11T09:00:00Z"))
        );
        assert_eq!(
            next("0 9 * * MON-FRI", "2024-03-09T12:00:00Z"),
            Some(at("2024-03-11T09:00:00Z"))
        );
    }

    #[test]
    fn test_seconds_field() {
        assert_eq!(
            next("*/10 * * * * *", "2024-03-10T10:00:05Z"),
            Some(at("2024-03-10T10:00:10Z"))
        );
        assert_eq!(
            next("30 0 12 * * *", "2024-03-10T12:00:30Z"),
            Some(at("2024-03-11T12:00:30Z"))
        );
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // the 13th or any Friday; 2024-03-13 is a Wednesday, 03-15 a Friday
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        assert_eq!(
            schedule.next_after(&at("2024-03-12T00:00:00Z")),
            Some(at("2024-03-13T00:00:00Z"))
        );
        assert_eq!(
            schedule.next_after(&at("2024-03-13T00:00:00Z")),
            Some(at("2024-03-15T00:00:00Z"))
        );
    }

    #[test]
    fn test_month_rollover_and_leap_day() {
        assert_eq!(
            next("0 0 1 * *", "2024-12-15T00:00:00Z"),
            Some(at("2025-01-01T00:00:00Z"))
        );
        assert_eq!(
            next("0 0 29 2 *", "2024-03-01T00:00:00Z"),
            Some(at("2028-02-29T00:00:00Z"))
        );
    }

    #[test]
    fn test_impossible_date_has_no_next() {
        assert_eq!(next("0 0 30 2 *", "2024-01-01T00:00:00Z"), None);
    }

    #[test]
    fn test_sunday_as_seven() {
        // 2024-03-10 is a Sunday
        assert_eq!(
            next("0 8 * * 7", "2024-03-09T00:00:00Z"),
            Some(at("2024-03-10T08:00:00Z"))
        );
        assert_eq!(
            CronSchedule::parse("0 8 * * 7").unwrap(),
            CronSchedule {
                source: "0 8 * * 7".to_string(),
                ..CronSchedule::parse("0 8 * * 0").unwrap()
            }
        );
    }

    #[test]
    fn test_lists_ranges_and_steps() {
        let schedule = CronSchedule::parse("5,10-40/10,55 * * * *").unwrap();
        for minute in [5, 10, 20, 30, 40, 55] {
            assert!(schedule.minutes.contains(minute));
        }
        assert!(!schedule.minutes.contains(50));

        let schedule = CronSchedule::parse("5/20 * * * *").unwrap();
        assert_eq!(schedule.minutes, FieldSet((1 << 5) | (1 << 25) | (1 << 45)));
    }

    #[test]
    fn test_month_names() {
        assert_eq!(
            next("0 0 1 JAN *", "2024-03-01T00:00:00Z"),
            Some(at("2025-01-01T00:00:00Z"))
        );
        assert_eq!(
            next("0 0 1 dec *", "2024-03-01T00:00:00Z"),
            Some(at("2024-12-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_shorthands() {
        assert_eq!(
            next("@hourly", "2024-03-10T10:07:00Z"),
            Some(at("2024-03-10T11:00:00Z"))
        );
        assert_eq!(
            next("@weekly", "2024-03-10T10:07:00Z"),
            Some(at("2024-03-17T00:00:00Z"))
        );
    }

    #[test]
    fn test_timezone_offset() {
        let schedule = CronSchedule::parse_with_timezone("0 9 * * *", "+02:00").unwrap();
        assert_eq!(
            schedule.next_after(&at("2024-03-10T00:00:00Z")),
            Some(at("2024-03-10T07:00:00Z"))
        );
        assert!(schedule.matches(&at("2024-03-11T07:00:00Z")));
        assert!(!schedule.matches(&at("2024-03-11T09:00:00Z")));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_timezone("utc").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_timezone("+05:30").unwrap().local_minus_utc(), 19_800);
        assert_eq!(parse_timezone("UTC-0800").unwrap().local_minus_utc(), -28_800);
        assert!(parse_timezone("Europe/Berlin").is_err());
        assert!(parse_timezone("+25:00").is_err());
    }

    #[test]
    fn test_upcoming() {
        let schedule = CronSchedule::parse("0 */6 * * *").unwrap();
        let times = schedule.upcoming(&at("2024-03-10T01:00:00Z"), 3);
        assert_eq!(
            times,
            vec![
                at("2024-03-10T06:00:00Z"),
                at("2024-03-10T12:00:00Z"),
                at("2024-03-10T18:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            CronSchedule::parse("* * *"),
            Err(CronError::FieldCount { count: 3, .. })
        ));
        assert!(CronSchedule::parse("invalid").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("5-2 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("1,,2 * * * *").is_err());
        assert!(CronSchedule::parse("* * * FOO *").is_err());
        let err = CronSchedule::parse("* * * * 8").unwrap_err();
        assert!(err.to_string().contains("day-of-week"));
    }
}
