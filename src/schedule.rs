use crate::calendar::CalendarDay;
use crate::models::{Frequency, Habit};

/// Whether `habit` is due on `day`.
///
/// A habit is schedulable from its creation day up to, but not including,
/// its deletion day. Every streak and analytics computation goes through
/// this function so the boundary is the same everywhere.
pub fn is_due(habit: &Habit, day: CalendarDay) -> bool {
    if !is_alive_on(habit, day) {
        return false;
    }

    match habit.frequency {
        Frequency::Daily => true,
        Frequency::Weekly => habit.weekly_days.contains(&day.weekday_index()),
        Frequency::Monthly => habit.monthly_dates.contains(&day.day_of_month()),
    }
}

/// Lifecycle window check: `[created_at, deleted_at)`
pub fn is_alive_on(habit: &Habit, day: CalendarDay) -> bool {
    if day < habit.created_at {
        return false;
    }
    match habit.deleted_at {
        Some(deleted) => day < deleted,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> CalendarDay {
        CalendarDay::parse(s).unwrap()
    }

    fn habit(frequency: Frequency) -> Habit {
        Habit::new("u1".to_string(), "Read".to_string(), frequency, day("2024-01-01"))
    }

    #[test]
    fn daily_is_due_across_the_whole_lifecycle() {
        let mut h = habit(Frequency::Daily);
        h.deleted_at = Some(day("2024-03-01"));
        for d in day("2024-01-01").iter_through(day("2024-02-29")) {
            assert!(is_due(&h, d), "{d} should be due");
        }
        assert!(!is_due(&h, day("2023-12-31")));
        // deletion day itself is no longer scheduled
        assert!(!is_due(&h, day("2024-03-01")));
        assert!(!is_due(&h, day("2024-03-02")));
    }

    #[test]
    fn weekly_matches_weekday_membership_only() {
        let mut h = habit(Frequency::Weekly);
        h.weekly_days = [0, 2, 4].into_iter().collect();
        assert!(is_due(&h, day("2024-01-01"))); // Mon
        assert!(!is_due(&h, day("2024-01-02"))); // Tue
        assert!(is_due(&h, day("2024-01-03"))); // Wed
        assert!(is_due(&h, day("2024-01-05"))); // Fri
        assert!(!is_due(&h, day("2024-01-07"))); // Sun
        // same weekday, different year
        assert!(is_due(&h, day("2029-01-01")));
    }

    #[test]
    fn monthly_matches_day_of_month_only() {
        let mut h = habit(Frequency::Monthly);
        h.monthly_dates = [1, 15, 31].into_iter().collect();
        assert!(is_due(&h, day("2024-01-15")));
        assert!(is_due(&h, day("2031-07-15")));
        assert!(is_due(&h, day("2024-01-31")));
        assert!(!is_due(&h, day("2024-02-29")));
        assert!(!is_due(&h, day("2024-02-14")));
    }

    #[test]
    fn empty_day_sets_are_never_due() {
        let weekly = habit(Frequency::Weekly);
        let monthly = habit(Frequency::Monthly);
        for d in day("2024-01-01").iter_through(day("2024-02-15")) {
            assert!(!is_due(&weekly, d));
            assert!(!is_due(&monthly, d));
        }
    }

    #[test]
    fn weekly_days_ignore_flag_when_daily() {
        let mut h = habit(Frequency::Daily);
        h.weekly_days = [6].into_iter().collect();
        assert!(is_due(&h, day("2024-01-02")));
    }
}
