use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::calendar::CalendarDay;
use crate::error::TrackerError;

/// How a habit decides which days it is due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl FromStr for Frequency {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(TrackerError::InvalidInput(format!("Unknown frequency: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    pub id: Option<i64>,
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub frequency: Frequency,
    /// Weekday indices, 0 = Monday .. 6 = Sunday. Only read for `Weekly`.
    pub weekly_days: BTreeSet<u8>,
    /// Days of month, 1..=31. Only read for `Monthly`.
    pub monthly_dates: BTreeSet<u32>,
    pub created_at: CalendarDay,
    pub deleted_at: Option<CalendarDay>,
}

impl Habit {
    pub fn new(user_id: String, name: String, frequency: Frequency, created_at: CalendarDay) -> Self {
        Self {
            id: None,
            user_id,
            name,
            color: "blue".to_string(),
            frequency,
            weekly_days: BTreeSet::new(),
            monthly_dates: BTreeSet::new(),
            created_at,
            deleted_at: None,
        }
    }
}

/// One logged day of a habit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: Option<i64>,
    pub habit_id: i64,
    pub day: CalendarDay,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Completion {
    pub fn new(habit_id: i64, day: CalendarDay) -> Self {
        Self {
            id: None,
            habit_id,
            day,
            deleted_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(TrackerError::InvalidInput(format!("Unknown priority: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceKind::None => "none",
            RecurrenceKind::Daily => "daily",
            RecurrenceKind::Weekly => "weekly",
            RecurrenceKind::Monthly => "monthly",
            RecurrenceKind::Custom => "custom",
        }
    }
}

impl FromStr for RecurrenceKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RecurrenceKind::None),
            "daily" => Ok(RecurrenceKind::Daily),
            "weekly" => Ok(RecurrenceKind::Weekly),
            "monthly" => Ok(RecurrenceKind::Monthly),
            "custom" => Ok(RecurrenceKind::Custom),
            other => Err(TrackerError::InvalidInput(format!("Unknown recurrence: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceUnit {
    Days,
    Weeks,
    Months,
}

/// Interval for `RecurrenceKind::Custom`, e.g. every 3 days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub interval: u32,
    pub unit: RecurrenceUnit,
}

impl FromStr for RecurrenceRule {
    type Err = TrackerError;

    /// Compact form: `<count><unit>` where unit is `d`, `w` or `m` (`3d`, `2w`, `1m`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || TrackerError::InvalidInput(format!("Invalid recurrence rule '{}', expected e.g. 3d, 2w, 1m", s));
        let unit_char = trimmed.chars().last().ok_or_else(invalid)?;
        let unit = match unit_char.to_ascii_lowercase() {
            'd' => RecurrenceUnit::Days,
            'w' => RecurrenceUnit::Weeks,
            'm' => RecurrenceUnit::Months,
            _ => return Err(invalid()),
        };
        let interval: u32 = trimmed[..trimmed.len() - unit_char.len_utf8()]
            .parse()
            .map_err(|_| invalid())?;
        if interval == 0 {
            return Err(invalid());
        }
        Ok(Self { interval, unit })
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            RecurrenceUnit::Days => 'd',
            RecurrenceUnit::Weeks => 'w',
            RecurrenceUnit::Months => 'm',
        };
        write!(f, "{}{}", self.interval, unit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: Option<i64>,
    pub title: String,
    pub position: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubTask {
    pub fn new(title: String, position: i64) -> Self {
        Self {
            id: None,
            title,
            position,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Option<i64>,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<CalendarDay>,
    /// Due date before the first auto-postpone. Written once.
    pub original_due_date: Option<CalendarDay>,
    pub recurrence: RecurrenceKind,
    pub recurrence_rule: Option<RecurrenceRule>,
    pub completed_at: Option<DateTime<Utc>>,
    pub auto_postpone: bool,
    /// Id of the task spawned when this one was completed
    pub successor_id: Option<i64>,
    pub subtasks: Vec<SubTask>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id,
            title,
            description: None,
            priority: Priority::default(),
            due_date: None,
            original_due_date: None,
            recurrence: RecurrenceKind::None,
            recurrence_rule: None,
            completed_at: None,
            auto_postpone: false,
            successor_id: None,
            subtasks: Vec::new(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Audit row written for every due-date shift made by the postpone job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostponeEntry {
    pub id: Option<i64>,
    pub task_id: i64,
    pub from_date: CalendarDay,
    pub to_date: CalendarDay,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_recurrence_rules() {
        let rule: RecurrenceRule = "3d".parse().unwrap();
        assert_eq!(rule, RecurrenceRule { interval: 3, unit: RecurrenceUnit::Days });
        assert_eq!("2W".parse::<RecurrenceRule>().unwrap().unit, RecurrenceUnit::Weeks);
        assert_eq!("1m".parse::<RecurrenceRule>().unwrap().to_string(), "1m");
    }

    #[test]
    fn rejects_unparseable_recurrence_rules() {
        for bad in ["", "d", "0d", "3y", "-1w", "three days"] {
            assert!(
                matches!(bad.parse::<RecurrenceRule>(), Err(TrackerError::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn enum_text_forms_are_stable() {
        assert_eq!("Weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert_eq!(RecurrenceKind::Custom.as_str(), "custom");
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("hourly".parse::<Frequency>().is_err());
    }
}
