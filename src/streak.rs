use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::calendar::CalendarDay;
use crate::models::{Completion, Habit};
use crate::schedule::is_due;

/// Upper bound on how many days a streak walk looks back
pub const MAX_STREAK_WALK_DAYS: i64 = 3650;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreakStats {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_completions: u32,
    pub completed_today: bool,
    pub last_completed: Option<CalendarDay>,
}

/// Compute current and longest streaks for `habit` as seen on `reference_day`.
///
/// Only days on which the habit is due take part: unscheduled days neither
/// extend nor break a run. A missing completion on `reference_day` itself
/// does not break the current streak, since the day is not over yet.
pub fn compute_streaks(habit: &Habit, completions: &[Completion], reference_day: CalendarDay) -> StreakStats {
    let done: BTreeSet<CalendarDay> = completions
        .iter()
        .filter(|c| c.is_live())
        .filter(|c| habit.id.is_none_or(|id| c.habit_id == id))
        .map(|c| c.day)
        .collect();

    let Some(&first) = done.first() else {
        return StreakStats::default();
    };
    if first > reference_day {
        // every completion is dated after the reference day
        return StreakStats::default();
    }

    let earliest_walk = reference_day.add_days(-(MAX_STREAK_WALK_DAYS - 1));
    let start = first.max(earliest_walk);
    let scheduled: Vec<CalendarDay> = start
        .iter_through(reference_day)
        .filter(|day| is_due(habit, *day))
        .collect();

    let mut longest = 0u32;
    let mut run = 0u32;
    for day in &scheduled {
        if done.contains(day) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }

    let mut current = 0u32;
    for day in scheduled.iter().rev() {
        if done.contains(day) {
            current += 1;
        } else if *day == reference_day {
            continue;
        } else {
            break;
        }
    }

    let stats = StreakStats {
        current_streak: current,
        longest_streak: longest,
        total_completions: done.len() as u32,
        completed_today: done.contains(&reference_day),
        last_completed: done.range(..=reference_day).next_back().copied(),
    };
    debug!(
        habit_id = ?habit.id,
        scheduled_days = scheduled.len(),
        current = stats.current_streak,
        longest = stats.longest_streak,
        "computed streaks"
    );
    stats
}
