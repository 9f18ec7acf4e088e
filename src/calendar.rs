use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;

/// ISO 8601 calendar-day format used for parsing, display and storage
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// A time-of-day-free calendar date.
///
/// Every scheduling comparison in the crate happens on this type. Timestamps
/// must be collapsed with [`CalendarDay::from_timestamp`] before they can take
/// part in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    /// Build a day from year/month/day, rejecting impossible dates
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, TrackerError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| {
                TrackerError::InvalidInput(format!("{:04}-{:02}-{:02} is not a calendar day", year, month, day))
            })
    }

    /// Parse a day in `YYYY-MM-DD` form
    pub fn parse(input: &str) -> Result<Self, TrackerError> {
        NaiveDate::parse_from_str(input.trim(), DAY_FORMAT)
            .map(Self)
            .map_err(|e| TrackerError::InvalidInput(format!("Invalid date '{}': {}", input, e)))
    }

    /// Collapse a timestamp to the day it falls on (UTC is the canonical day)
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.date_naive())
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day_of_month(&self) -> u32 {
        self.0.day()
    }

    /// Weekday index with Monday = 0 through Sunday = 6
    pub fn weekday_index(&self) -> u8 {
        self.0.weekday().num_days_from_monday() as u8
    }

    pub fn year_month(&self) -> YearMonth {
        YearMonth {
            year: self.year(),
            month: self.month(),
        }
    }

    pub fn succ(&self) -> Self {
        self.add_days(1)
    }

    pub fn pred(&self) -> Self {
        self.add_days(-1)
    }

    /// Shift by a signed number of days, saturating at chrono's date range
    pub fn add_days(&self, days: i64) -> Self {
        self.checked_add_days(days).unwrap_or(*self)
    }

    /// Shift by a signed number of days; `None` outside chrono's date range
    pub fn checked_add_days(&self, days: i64) -> Option<Self> {
        let shifted = if days >= 0 {
            self.0.checked_add_days(chrono::Days::new(days.unsigned_abs()))
        } else {
            self.0.checked_sub_days(chrono::Days::new(days.unsigned_abs()))
        };
        shifted.map(Self)
    }

    /// Same day-of-month `months` later, clamped to the target month's last day
    /// (Jan 31 + 1 month = Feb 28, or Feb 29 in a leap year).
    pub fn add_months(&self, months: u32) -> Self {
        self.checked_add_months(months).unwrap_or(*self)
    }

    /// Like [`add_months`](Self::add_months) but `None` outside chrono's date range
    pub fn checked_add_months(&self, months: u32) -> Option<Self> {
        // chrono already clamps to the last valid day when the source day is missing
        self.0.checked_add_months(Months::new(months)).map(Self)
    }

    /// Number of days from `self` to `other`; negative when `other` is earlier
    pub fn days_until(&self, other: CalendarDay) -> i64 {
        (other.0 - self.0).num_days()
    }

    /// Iterate `self..=end` in ascending order; empty when `end < self`
    pub fn iter_through(self, end: CalendarDay) -> impl Iterator<Item = CalendarDay> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            if current > end {
                next = None;
                return None;
            }
            next = if current == end { None } else { Some(current.succ()) };
            Some(current)
        })
    }

    pub fn format(&self, fmt: &str) -> String {
        self.0.format(fmt).to_string()
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_FORMAT))
    }
}

impl FromStr for CalendarDay {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl ToSql for CalendarDay {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for CalendarDay {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        NaiveDate::parse_from_str(text, DAY_FORMAT)
            .map(Self)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A calendar month, e.g. `2025-02`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, TrackerError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(TrackerError::InvalidInput(format!("{:04}-{:02} is not a calendar month", year, month)));
        }
        Ok(Self { year, month })
    }

    /// Parse a month in `YYYY-MM` form
    pub fn parse(input: &str) -> Result<Self, TrackerError> {
        let invalid = || TrackerError::InvalidInput(format!("Invalid month '{}', expected YYYY-MM", input));
        let (year, month) = input.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }

    pub fn first_day(&self) -> CalendarDay {
        // `new` validated the month, so day 1 always exists
        CalendarDay(NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default())
    }

    pub fn last_day(&self) -> CalendarDay {
        CalendarDay(self.first_day().0 + chrono::Days::new(u64::from(self.days_in_month()) - 1))
    }

    pub fn days_in_month(&self) -> u32 {
        let first = self.first_day().0;
        let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
        (next - first).num_days().max(1) as u32
    }

    /// Every day of this month in order
    pub fn days(self) -> impl Iterator<Item = CalendarDay> {
        self.first_day().iter_through(self.last_day())
    }

    pub fn pred(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(s: &str) -> CalendarDay {
        CalendarDay::parse(s).unwrap()
    }

    #[test]
    fn parses_and_displays_iso_days() {
        assert_eq!(day("2025-03-09").to_string(), "2025-03-09");
        assert!(CalendarDay::parse("2025-02-30").is_err());
        assert!(CalendarDay::parse("09/03/2025").is_err());
    }

    #[test]
    fn timestamp_collapses_to_its_day() {
        let ts = Utc.with_ymd_and_hms(2023, 10, 27, 23, 59, 59).unwrap();
        assert_eq!(CalendarDay::from_timestamp(ts), day("2023-10-27"));
    }

    #[test]
    fn weekday_index_starts_on_monday() {
        assert_eq!(day("2025-01-06").weekday_index(), 0);
        assert_eq!(day("2025-01-12").weekday_index(), 6);
    }

    #[test]
    fn add_months_clamps_to_month_end() {
        assert_eq!(day("2025-01-31").add_months(1), day("2025-02-28"));
        assert_eq!(day("2024-01-31").add_months(1), day("2024-02-29"));
        assert_eq!(day("2025-03-31").add_months(1), day("2025-04-30"));
        assert_eq!(day("2025-12-15").add_months(1), day("2026-01-15"));
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        assert_eq!(day("2025-01-31").checked_add_months(1), Some(day("2025-02-28")));
        assert_eq!(day("2025-01-01").checked_add_days(-1), Some(day("2024-12-31")));
        assert_eq!(day("2025-01-01").checked_add_months(u32::MAX), None);
        assert_eq!(day("2025-01-01").checked_add_days(i64::from(u32::MAX)), None);
        assert_eq!(day("2025-01-01").add_days(i64::from(u32::MAX)), day("2025-01-01"));
    }

    #[test]
    fn iter_through_is_inclusive_and_empty_when_reversed() {
        let days: Vec<_> = day("2025-02-27").iter_through(day("2025-03-01")).collect();
        assert_eq!(days, vec![day("2025-02-27"), day("2025-02-28"), day("2025-03-01")]);
        assert_eq!(day("2025-03-02").iter_through(day("2025-03-01")).count(), 0);
    }

    #[test]
    fn year_month_bounds() {
        let feb = YearMonth::parse("2024-02").unwrap();
        assert_eq!(feb.days_in_month(), 29);
        assert_eq!(feb.last_day(), day("2024-02-29"));
        assert_eq!(feb.days().count(), 29);
        assert_eq!(YearMonth::parse("2025-01").unwrap().pred().to_string(), "2024-12");
        assert!(YearMonth::parse("2025-13").is_err());
        assert!(YearMonth::parse("2025").is_err());
    }

    #[test]
    fn round_trips_through_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let stored: CalendarDay = conn
            .query_row("SELECT ?1", [day("2025-07-04")], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, day("2025-07-04"));
    }
}
