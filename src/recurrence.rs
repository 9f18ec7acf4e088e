use chrono::Utc;

use crate::calendar::CalendarDay;
use crate::models::{RecurrenceKind, RecurrenceRule, RecurrenceUnit, SubTask, Task};

/// Next due date after `due` for the given recurrence.
///
/// Returns `None` for non-recurring tasks, for custom recurrences
/// without a usable rule and when the next date falls outside the
/// representable calendar.
pub fn next_due_date(due: CalendarDay, kind: RecurrenceKind, rule: Option<&RecurrenceRule>) -> Option<CalendarDay> {
    match kind {
        RecurrenceKind::None => None,
        RecurrenceKind::Daily => due.checked_add_days(1),
        RecurrenceKind::Weekly => due.checked_add_days(7),
        RecurrenceKind::Monthly => due.checked_add_months(1),
        RecurrenceKind::Custom => {
            let rule = rule?;
            if rule.interval == 0 {
                return None;
            }
            match rule.unit {
                RecurrenceUnit::Days => due.checked_add_days(i64::from(rule.interval)),
                RecurrenceUnit::Weeks => due.checked_add_days(i64::from(rule.interval) * 7),
                RecurrenceUnit::Months => due.checked_add_months(rule.interval),
            }
        }
    }
}

/// Build the next instance of a recurring task.
///
/// The successor is a fresh, unsaved task: completion and postpone
/// provenance are cleared and subtasks are cloned with completion reset.
/// A task without a due date recurs from `today`.
pub fn advance(task: &Task, today: CalendarDay) -> Option<Task> {
    let base = task.due_date.unwrap_or(today);
    let next_due = next_due_date(base, task.recurrence, task.recurrence_rule.as_ref())?;

    let now = Utc::now();
    let subtasks = task
        .subtasks
        .iter()
        .map(|sub| SubTask::new(sub.title.clone(), sub.position))
        .collect();

    Some(Task {
        id: None,
        user_id: task.user_id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        priority: task.priority,
        due_date: Some(next_due),
        original_due_date: None,
        recurrence: task.recurrence,
        recurrence_rule: task.recurrence_rule,
        completed_at: None,
        auto_postpone: task.auto_postpone,
        successor_id: None,
        subtasks,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn day(s: &str) -> CalendarDay {
        CalendarDay::parse(s).unwrap()
    }

    fn next(due: &str, kind: RecurrenceKind, rule: Option<&str>) -> Option<CalendarDay> {
        let rule = rule.map(|r| r.parse::<RecurrenceRule>().unwrap());
        next_due_date(day(due), kind, rule.as_ref())
    }

    #[test]
    fn fixed_intervals() {
        assert_eq!(next("2025-02-28", RecurrenceKind::Daily, None), Some(day("2025-03-01")));
        assert_eq!(next("2025-12-29", RecurrenceKind::Weekly, None), Some(day("2026-01-05")));
        assert_eq!(next("2025-03-15", RecurrenceKind::Monthly, None), Some(day("2025-04-15")));
        assert_eq!(next("2025-03-15", RecurrenceKind::None, None), None);
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        assert_eq!(next("2025-01-31", RecurrenceKind::Monthly, None), Some(day("2025-02-28")));
        assert_eq!(next("2024-01-31", RecurrenceKind::Monthly, None), Some(day("2024-02-29")));
        assert_eq!(next("2025-05-31", RecurrenceKind::Monthly, None), Some(day("2025-06-30")));
    }

    #[test]
    fn custom_intervals() {
        assert_eq!(next("2025-01-01", RecurrenceKind::Custom, Some("3d")), Some(day("2025-01-04")));
        assert_eq!(next("2025-01-01", RecurrenceKind::Custom, Some("2w")), Some(day("2025-01-15")));
        assert_eq!(next("2025-10-31", RecurrenceKind::Custom, Some("4m")), Some(day("2026-02-28")));
    }

    #[test]
    fn interval_past_calendar_range_has_no_next_date() {
        assert_eq!(next("2025-01-01", RecurrenceKind::Custom, Some("4294967295m")), None);
        assert_eq!(next("2025-01-01", RecurrenceKind::Custom, Some("4294967295d")), None);
        assert_eq!(next("2025-01-01", RecurrenceKind::Custom, Some("4294967295w")), None);

        let mut task = Task::new("u1".to_string(), "Someday".to_string());
        task.due_date = Some(day("2025-01-01"));
        task.recurrence = RecurrenceKind::Custom;
        task.recurrence_rule = Some("4294967295m".parse().unwrap());
        assert!(advance(&task, day("2025-01-01")).is_none());
    }

    #[test]
    fn custom_without_rule_has_no_next_date() {
        assert_eq!(next("2025-01-01", RecurrenceKind::Custom, None), None);
        let zero = RecurrenceRule { interval: 0, unit: RecurrenceUnit::Days };
        assert_eq!(next_due_date(day("2025-01-01"), RecurrenceKind::Custom, Some(&zero)), None);
    }

    fn recurring_task() -> Task {
        let mut task = Task::new("u1".to_string(), "Pay rent".to_string());
        task.id = Some(7);
        task.description = Some("Transfer to landlord".to_string());
        task.priority = Priority::High;
        task.due_date = Some(day("2025-01-31"));
        task.original_due_date = Some(day("2025-01-28"));
        task.recurrence = RecurrenceKind::Monthly;
        task.auto_postpone = true;
        task.completed_at = Some(Utc::now());
        task.successor_id = Some(99);
        let mut first = SubTask::new("Check balance".to_string(), 0);
        first.id = Some(70);
        first.completed_at = Some(Utc::now());
        task.subtasks = vec![first, SubTask::new("Send receipt".to_string(), 1)];
        task
    }

    #[test]
    fn successor_carries_content_and_resets_state() {
        let task = recurring_task();
        let next = advance(&task, day("2025-02-02")).unwrap();
        assert_eq!(next.id, None);
        assert_eq!(next.user_id, "u1");
        assert_eq!(next.title, "Pay rent");
        assert_eq!(next.description.as_deref(), Some("Transfer to landlord"));
        assert_eq!(next.priority, Priority::High);
        assert_eq!(next.recurrence, RecurrenceKind::Monthly);
        assert!(next.auto_postpone);
        assert_eq!(next.due_date, Some(day("2025-02-28")));
        assert_eq!(next.original_due_date, None);
        assert_eq!(next.completed_at, None);
        assert_eq!(next.successor_id, None);

        let titles: Vec<_> = next.subtasks.iter().map(|s| (s.title.as_str(), s.position)).collect();
        assert_eq!(titles, vec![("Check balance", 0), ("Send receipt", 1)]);
        assert!(next.subtasks.iter().all(|s| s.id.is_none() && s.completed_at.is_none()));
    }

    #[test]
    fn non_recurring_has_no_successor() {
        let mut task = recurring_task();
        task.recurrence = RecurrenceKind::None;
        assert!(advance(&task, day("2025-02-02")).is_none());
    }

    #[test]
    fn undated_task_recurs_from_today() {
        let mut task = recurring_task();
        task.due_date = None;
        task.recurrence = RecurrenceKind::Daily;
        let next = advance(&task, day("2025-02-02")).unwrap();
        assert_eq!(next.due_date, Some(day("2025-02-03")));
    }
}
