//! Date parsing and calendar bucketing shared by the compiler, the statistics
//! engine and the drivers.
//!
//! All calendar arithmetic happens in UTC.

use bson::DateTime as BsonDateTime;
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A date operand as written by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOperand {
    /// A full timestamp.
    Instant(DateTime<Utc>),
    /// A calendar day without a time component, covering the whole day.
    Day(NaiveDate),
}

impl DateOperand {
    /// Parses RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS[.f]` timestamps (read as UTC)
    /// and `YYYY-MM-DD` days.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
            return Some(DateOperand::Instant(instant.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(DateOperand::Instant(Utc.from_utc_datetime(&naive)));
        }

        NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .ok()
            .map(DateOperand::Day)
    }

    /// First instant covered by the operand.
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            DateOperand::Instant(instant) => *instant,
            DateOperand::Day(day) => start_of_day(*day),
        }
    }

    /// First instant after the operand. For an instant this is the instant itself.
    ///
    /// `None` when the day is the last representable one.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        match self {
            DateOperand::Instant(instant) => Some(*instant),
            DateOperand::Day(day) => start_of_day(*day).checked_add_signed(Duration::days(1)),
        }
    }
}

/// Midnight UTC of the given day.
pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Converts a chrono timestamp into a BSON value.
pub fn to_bson(instant: DateTime<Utc>) -> bson::Bson {
    bson::Bson::DateTime(BsonDateTime::from_chrono(instant))
}

/// Fixed-width calendar intervals used for time bucketing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeInterval {
    Day,
    /// ISO weeks, starting on Monday.
    Week,
    Month,
    Year,
}

impl TimeInterval {
    /// Unit name as understood by `$dateTrunc`.
    pub fn unit(&self) -> &'static str {
        match self {
            TimeInterval::Day => "day",
            TimeInterval::Week => "week",
            TimeInterval::Month => "month",
            TimeInterval::Year => "year",
        }
    }

    /// Parses a `$dateTrunc` unit name.
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "day" => Some(TimeInterval::Day),
            "week" => Some(TimeInterval::Week),
            "month" => Some(TimeInterval::Month),
            "year" => Some(TimeInterval::Year),
            _ => None,
        }
    }

    /// Start of the bucket containing `instant`.
    pub fn truncate(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let day = instant.date_naive();
        let first = match self {
            TimeInterval::Day => day,
            TimeInterval::Week => day
                .checked_sub_days(Days::new(u64::from(day.weekday().num_days_from_monday())))
                .unwrap_or(NaiveDate::MIN),
            TimeInterval::Month => day.with_day(1).unwrap_or(day),
            TimeInterval::Year => day.with_day(1).and_then(|d| d.with_month(1)).unwrap_or(day),
        };

        start_of_day(first)
    }

    /// Start of the bucket following the one starting at `bucket`, `None` past the last
    /// representable instant.
    pub fn next(&self, bucket: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeInterval::Day => bucket.checked_add_days(Days::new(1)),
            TimeInterval::Week => bucket.checked_add_days(Days::new(7)),
            TimeInterval::Month => bucket.checked_add_months(Months::new(1)),
            TimeInterval::Year => bucket.checked_add_months(Months::new(12)),
        }
    }

    /// Display label of the bucket starting at `bucket`.
    pub fn label(&self, bucket: DateTime<Utc>) -> String {
        match self {
            TimeInterval::Day => bucket.format("%d/%m/%Y").to_string(),
            TimeInterval::Week => {
                let week = bucket.iso_week();
                format!("W{}-{}", week.week(), week.year())
            }
            TimeInterval::Month => bucket.format("%b %y").to_string(),
            TimeInterval::Year => bucket.format("%Y").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(input: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(input).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_operands() {
        assert_eq!(
            DateOperand::parse("2024-03-05"),
            Some(DateOperand::Day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()))
        );
        assert_eq!(
            DateOperand::parse("2024-03-05T10:00:00Z"),
            Some(DateOperand::Instant(at("2024-03-05T10:00:00Z")))
        );
        assert_eq!(
            DateOperand::parse("2024-03-05T10:00:00"),
            Some(DateOperand::Instant(at("2024-03-05T10:00:00Z")))
        );
        assert_eq!(DateOperand::parse("yesterday-ish"), None);
    }

    #[test]
    fn test_day_operand_covers_whole_day() {
        let day = DateOperand::parse("2024-03-05").unwrap();

        assert_eq!(day.start(), at("2024-03-05T00:00:00Z"));
        assert_eq!(day.end(), Some(at("2024-03-06T00:00:00Z")));
        assert_eq!(DateOperand::Day(NaiveDate::MAX).end(), None);
    }

    #[test]
    fn test_truncate() {
        let instant = at("2024-03-07T15:42:00Z");

        assert_eq!(TimeInterval::Day.truncate(instant), at("2024-03-07T00:00:00Z"));
        assert_eq!(TimeInterval::Week.truncate(instant), at("2024-03-04T00:00:00Z"));
        assert_eq!(TimeInterval::Month.truncate(instant), at("2024-03-01T00:00:00Z"));
        assert_eq!(TimeInterval::Year.truncate(instant), at("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_next_and_labels() {
        let january = at("2024-01-31T00:00:00Z");

        assert_eq!(TimeInterval::Month.next(at("2024-01-01T00:00:00Z")), Some(at("2024-02-01T00:00:00Z")));
        assert_eq!(TimeInterval::Year.next(at("2024-01-01T00:00:00Z")), Some(at("2025-01-01T00:00:00Z")));
        assert_eq!(TimeInterval::Week.next(at("2024-03-04T00:00:00Z")), Some(at("2024-03-11T00:00:00Z")));
        assert_eq!(TimeInterval::Day.next(DateTime::<Utc>::MAX_UTC), None);
        assert_eq!(TimeInterval::Day.label(january), "31/01/2024");
        assert_eq!(TimeInterval::Month.label(january), "Jan 24");
        assert_eq!(TimeInterval::Week.label(at("2024-01-01T00:00:00Z")), "W1-2024");
    }
}
