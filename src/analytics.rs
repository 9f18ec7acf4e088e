use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::calendar::{CalendarDay, YearMonth};
use crate::error::TrackerError;
use crate::models::{Completion, Habit};
use crate::schedule::is_due;

/// Window shown by a completion chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartView {
    /// Last 7 days, one point per day
    Weekly,
    /// Last 30 days, one point per day
    Monthly,
    /// Last 12 calendar months, one point per month
    Yearly,
}

impl FromStr for ChartView {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Ok(ChartView::Weekly),
            "monthly" | "month" => Ok(ChartView::Monthly),
            "yearly" | "year" => Ok(ChartView::Yearly),
            other => Err(TrackerError::InvalidInput(format!("Unknown chart view: {}", other))),
        }
    }
}

impl fmt::Display for ChartView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartView::Weekly => "weekly",
            ChartView::Monthly => "monthly",
            ChartView::Yearly => "yearly",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayRate {
    pub date: CalendarDay,
    pub rate: u32,
    pub completed: u32,
    pub scheduled: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    /// The day, or the first day of the month for yearly points
    pub date: CalendarDay,
    pub rate: u32,
    pub completed: u32,
    pub scheduled: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapCell {
    pub date: CalendarDay,
    pub rate: u32,
    pub completed: u32,
    pub scheduled: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HabitDayStatus {
    pub id: i64,
    pub name: String,
    pub completed: bool,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayDetail {
    pub date: CalendarDay,
    pub habits: Vec<HabitDayStatus>,
}

/// Percentage of `completed` over `scheduled`, rounded half up; 0 when nothing was due
pub fn completion_percent(completed: u32, scheduled: u32) -> u32 {
    if scheduled == 0 {
        return 0;
    }
    let (completed, scheduled) = (u64::from(completed), u64::from(scheduled));
    ((completed * 200 + scheduled) / (scheduled * 2)) as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    completed: u32,
    scheduled: u32,
}

impl Counts {
    fn accumulate(&mut self, other: Counts) {
        self.completed += other.completed;
        self.scheduled += other.scheduled;
    }

    fn rate(&self) -> u32 {
        completion_percent(self.completed, self.scheduled)
    }
}

/// A user's habits and completions, fetched once and indexed by day.
///
/// All aggregations read from the same snapshot so repeated calls are
/// deterministic.
pub struct Snapshot<'a> {
    habits: Vec<&'a Habit>,
    done_by_day: HashMap<CalendarDay, HashSet<i64>>,
}

impl<'a> Snapshot<'a> {
    /// Habits without an id have never been stored and are skipped
    pub fn new(habits: &'a [Habit], completions: &[Completion]) -> Self {
        let mut seen = HashSet::new();
        let habits: Vec<&Habit> = habits
            .iter()
            .filter(|h| h.id.is_some_and(|id| seen.insert(id)))
            .collect();

        let mut done_by_day: HashMap<CalendarDay, HashSet<i64>> = HashMap::new();
        for completion in completions.iter().filter(|c| c.is_live()) {
            done_by_day.entry(completion.day).or_default().insert(completion.habit_id);
        }

        Self { habits, done_by_day }
    }

    fn is_done(&self, habit_id: i64, day: CalendarDay) -> bool {
        self.done_by_day
            .get(&day)
            .is_some_and(|ids| ids.contains(&habit_id))
    }

    /// Habits due on `day` paired with whether they were completed
    fn due_on(&self, day: CalendarDay) -> impl Iterator<Item = (&'a Habit, bool)> + '_ {
        self.habits
            .iter()
            .copied()
            .filter(move |h| is_due(h, day))
            .filter_map(move |h| h.id.map(|id| (h, self.is_done(id, day))))
    }

    fn counts(&self, day: CalendarDay) -> Counts {
        let mut counts = Counts::default();
        for (_, completed) in self.due_on(day) {
            counts.scheduled += 1;
            if completed {
                counts.completed += 1;
            }
        }
        counts
    }

    pub fn completion_rate(&self, day: CalendarDay) -> DayRate {
        let counts = self.counts(day);
        DayRate {
            date: day,
            rate: counts.rate(),
            completed: counts.completed,
            scheduled: counts.scheduled,
        }
    }

    /// Chart points ending at `reference_day`, oldest first
    pub fn chart_series(&self, view: ChartView, reference_day: CalendarDay) -> Vec<ChartPoint> {
        match view {
            ChartView::Weekly => self.daily_points(reference_day, 7, "%a"),
            ChartView::Monthly => self.daily_points(reference_day, 30, "%b %d"),
            ChartView::Yearly => self.monthly_points(reference_day, 12),
        }
    }

    fn daily_points(&self, reference_day: CalendarDay, days: i64, label_format: &str) -> Vec<ChartPoint> {
        reference_day
            .add_days(-(days - 1))
            .iter_through(reference_day)
            .map(|day| {
                let counts = self.counts(day);
                ChartPoint {
                    label: day.format(label_format),
                    date: day,
                    rate: counts.rate(),
                    completed: counts.completed,
                    scheduled: counts.scheduled,
                }
            })
            .collect()
    }

    /// Each point is the ratio of summed counts over the month, never an average of daily rates
    fn monthly_points(&self, reference_day: CalendarDay, months: usize) -> Vec<ChartPoint> {
        let mut month = reference_day.year_month();
        let mut buckets = Vec::with_capacity(months);
        for _ in 0..months {
            buckets.push(month);
            month = month.pred();
        }
        buckets.reverse();

        buckets
            .into_iter()
            .map(|month| {
                let mut total = Counts::default();
                for day in month.days().take_while(|day| *day <= reference_day) {
                    total.accumulate(self.counts(day));
                }
                let first = month.first_day();
                ChartPoint {
                    label: first.format("%b"),
                    date: first,
                    rate: total.rate(),
                    completed: total.completed,
                    scheduled: total.scheduled,
                }
            })
            .collect()
    }

    pub fn heatmap_month(&self, month: YearMonth) -> Vec<HeatmapCell> {
        month
            .days()
            .map(|day| {
                let counts = self.counts(day);
                HeatmapCell {
                    date: day,
                    rate: counts.rate(),
                    completed: counts.completed,
                    scheduled: counts.scheduled,
                }
            })
            .collect()
    }

    pub fn heatmap_day_detail(&self, day: CalendarDay) -> DayDetail {
        let habits = self
            .due_on(day)
            .filter_map(|(habit, completed)| {
                habit.id.map(|id| HabitDayStatus {
                    id,
                    name: habit.name.clone(),
                    completed,
                    color: habit.color.clone(),
                })
            })
            .collect();
        DayDetail { date: day, habits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Frequency;
    use chrono::Utc;

    fn day(s: &str) -> CalendarDay {
        CalendarDay::parse(s).unwrap()
    }

    fn habit(id: i64, name: &str, frequency: Frequency) -> Habit {
        let mut h = Habit::new("u1".to_string(), name.to_string(), frequency, day("2024-01-01"));
        h.id = Some(id);
        h
    }

    fn three_daily() -> Vec<Habit> {
        vec![
            habit(1, "Read", Frequency::Daily),
            habit(2, "Walk", Frequency::Daily),
            habit(3, "Write", Frequency::Daily),
        ]
    }

    #[test]
    fn rate_rounds_to_whole_percent() {
        assert_eq!(completion_percent(1, 3), 33);
        assert_eq!(completion_percent(2, 3), 67);
        assert_eq!(completion_percent(1, 2), 50);
        assert_eq!(completion_percent(1, 8), 13);
        assert_eq!(completion_percent(0, 0), 0);
    }

    #[test]
    fn completion_rate_for_one_of_three() {
        let habits = three_daily();
        let done = vec![Completion::new(2, day("2024-02-10"))];
        let snapshot = Snapshot::new(&habits, &done);
        let rate = snapshot.completion_rate(day("2024-02-10"));
        assert_eq!(rate.rate, 33);
        assert_eq!(rate.scheduled, 3);
        assert_eq!(rate.completed, 1);
    }

    #[test]
    fn nothing_due_is_zero_rate() {
        let habits = vec![habit(1, "Gym", Frequency::Weekly)];
        let snapshot = Snapshot::new(&habits, &[]);
        let rate = snapshot.completion_rate(day("2024-02-10"));
        assert_eq!((rate.rate, rate.scheduled), (0, 0));
    }

    #[test]
    fn completions_for_unscheduled_or_deleted_habits_are_not_counted() {
        let mut habits = three_daily();
        habits[2].deleted_at = Some(day("2024-02-10"));
        let mut weekly = habit(4, "Gym", Frequency::Weekly);
        weekly.weekly_days = [0].into_iter().collect();
        habits.push(weekly);

        // 2024-02-10 is a Saturday
        let mut deleted = Completion::new(1, day("2024-02-10"));
        deleted.deleted_at = Some(Utc::now());
        let done = vec![
            deleted,
            Completion::new(2, day("2024-02-10")),
            Completion::new(3, day("2024-02-10")),
            Completion::new(4, day("2024-02-10")),
        ];
        let rate = Snapshot::new(&habits, &done).completion_rate(day("2024-02-10"));
        assert_eq!(rate.scheduled, 2);
        assert_eq!(rate.completed, 1);
        assert_eq!(rate.rate, 50);
    }

    #[test]
    fn duplicate_rows_are_not_double_counted() {
        let mut habits = three_daily();
        habits.push(habit(1, "Read", Frequency::Daily));
        let done = vec![Completion::new(1, day("2024-02-10")), Completion::new(1, day("2024-02-10"))];
        let rate = Snapshot::new(&habits, &done).completion_rate(day("2024-02-10"));
        assert_eq!((rate.completed, rate.scheduled), (1, 3));
    }

    #[test]
    fn weekly_chart_has_seven_points_ending_today() {
        let habits = three_daily();
        let done = vec![Completion::new(1, day("2024-03-07"))];
        let points = Snapshot::new(&habits, &done).chart_series(ChartView::Weekly, day("2024-03-07"));
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].date, day("2024-03-01"));
        assert_eq!(points[6].date, day("2024-03-07"));
        assert_eq!(points[6].label, "Thu");
        assert_eq!(points[6].rate, 33);
        assert_eq!(points[5].rate, 0);
    }

    #[test]
    fn monthly_chart_has_thirty_points() {
        let habits = three_daily();
        let points = Snapshot::new(&habits, &[]).chart_series(ChartView::Monthly, day("2024-03-30"));
        assert_eq!(points.len(), 30);
        assert_eq!(points[0].date, day("2024-03-01"));
        assert_eq!(points[0].label, "Mar 01");
    }

    #[test]
    fn yearly_chart_sums_counts_instead_of_averaging_rates() {
        let mut sparse = habit(1, "Review", Frequency::Monthly);
        sparse.monthly_dates = [1].into_iter().collect();
        let dense = habit(2, "Stretch", Frequency::Daily);
        let habits = vec![sparse, dense];

        // January 2024: review done on the 1st, stretch on every day
        let mut done = vec![Completion::new(1, day("2024-01-01"))];
        done.extend(day("2024-01-01").iter_through(day("2024-01-10")).map(|d| Completion::new(2, d)));

        let points = Snapshot::new(&habits, &done).chart_series(ChartView::Yearly, day("2024-01-10"));
        assert_eq!(points.len(), 12);
        assert_eq!(points[0].date, day("2023-02-01"));
        let jan = &points[11];
        assert_eq!(jan.label, "Jan");
        // 11 scheduled instances (1 review + 10 stretches), all completed
        assert_eq!((jan.completed, jan.scheduled, jan.rate), (11, 11, 100));
        // months before creation have nothing due
        assert_eq!(points[10].scheduled, 0);
    }

    #[test]
    fn yearly_bucket_stops_at_reference_day() {
        let habits = vec![habit(1, "Read", Frequency::Daily)];
        let done: Vec<_> = day("2024-02-01")
            .iter_through(day("2024-02-05"))
            .map(|d| Completion::new(1, d))
            .collect();
        let points = Snapshot::new(&habits, &done).chart_series(ChartView::Yearly, day("2024-02-10"));
        let feb = points.last().unwrap();
        assert_eq!((feb.completed, feb.scheduled, feb.rate), (5, 10, 50));
        let jan = &points[points.len() - 2];
        assert_eq!((jan.completed, jan.scheduled), (0, 31));
    }

    #[test]
    fn heatmap_month_has_a_cell_per_day() {
        let habits = three_daily();
        let done = vec![Completion::new(1, day("2024-02-29")), Completion::new(2, day("2024-02-29"))];
        let cells = Snapshot::new(&habits, &done).heatmap_month(YearMonth::parse("2024-02").unwrap());
        assert_eq!(cells.len(), 29);
        let leap = cells.last().unwrap();
        assert_eq!(leap.date, day("2024-02-29"));
        assert_eq!((leap.completed, leap.scheduled, leap.rate), (2, 3, 67));
    }

    #[test]
    fn day_detail_lists_due_habits() {
        let mut habits = three_daily();
        habits[1].color = "green".to_string();
        let mut weekly = habit(4, "Gym", Frequency::Weekly);
        weekly.weekly_days = [0].into_iter().collect();
        habits.push(weekly);

        let done = vec![Completion::new(2, day("2024-02-10"))];
        let detail = Snapshot::new(&habits, &done).heatmap_day_detail(day("2024-02-10"));
        assert_eq!(detail.date, day("2024-02-10"));
        assert_eq!(detail.habits.len(), 3);
        let walk = detail.habits.iter().find(|h| h.id == 2).unwrap();
        assert!(walk.completed);
        assert_eq!(walk.color, "green");
        assert!(detail.habits.iter().filter(|h| h.id != 2).all(|h| !h.completed));
    }
}
