use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;

use crate::analytics::{ChartView, Snapshot};
use crate::calendar::{CalendarDay, YearMonth};
use crate::database::{Database, DatabaseError};
use crate::error::TrackerError;
use crate::models::{Frequency, Habit, Priority, RecurrenceKind, RecurrenceRule, SubTask, Task};
use crate::postpone;
use crate::streak::compute_streaks;
use crate::utils::{parse_month_days, parse_weekdays};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Habit streaks, completion charts and task rollover")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    /// Reference day (YYYY-MM-DD) instead of the system date
    #[arg(long, global = true)]
    pub today: Option<String>,

    /// Act as this user instead of the configured one
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a habit
    AddHabit {
        name: String,
        /// daily, weekly or monthly
        #[arg(long, default_value = "daily")]
        frequency: String,
        /// Weekdays for weekly habits, e.g. mon,wed,fri
        #[arg(long)]
        days: Option<String>,
        /// Days of month for monthly habits, e.g. 1,15
        #[arg(long)]
        dates: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// First schedulable day (defaults to today)
        #[arg(long)]
        start: Option<String>,
    },
    /// List habits with today's status
    ListHabits,
    /// Retire a habit from today on
    DeleteHabit { id: i64 },
    /// Mark a habit done for a day
    Check {
        habit_id: i64,
        #[arg(long)]
        date: Option<String>,
    },
    /// Undo a habit completion
    Uncheck {
        habit_id: i64,
        #[arg(long)]
        date: Option<String>,
    },
    /// Streaks and totals for one habit
    Stats { habit_id: i64 },
    /// Completion rate chart
    Chart {
        /// weekly, monthly or yearly
        #[arg(long)]
        view: Option<String>,
    },
    /// Per-day completion cells for a month
    Heatmap {
        /// YYYY-MM (defaults to the current month)
        #[arg(long)]
        month: Option<String>,
    },
    /// Which habits were due and done on a day
    Day { date: Option<String> },
    /// Create a task
    AddTask {
        title: String,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// low, medium or high
        #[arg(long, default_value = "medium")]
        priority: String,
        /// none, daily, weekly, monthly or custom
        #[arg(long, default_value = "none")]
        repeat: String,
        /// Interval for custom repeats, e.g. 3d, 2w, 1m
        #[arg(long)]
        every: Option<String>,
        /// Roll the task forward automatically when overdue
        #[arg(long)]
        auto_postpone: bool,
        /// Subtask title (repeatable)
        #[arg(long = "subtask")]
        subtasks: Vec<String>,
    },
    /// List open tasks
    ListTasks {
        /// Include completed tasks
        #[arg(long)]
        all: bool,
    },
    /// Complete a task, spawning the next one if it repeats
    CompleteTask { id: i64 },
    /// Mark a completed task as open again
    ReopenTask { id: i64 },
    /// Delete a task
    DeleteTask { id: i64 },
    /// Move overdue auto-postpone tasks to today
    Postpone,
    /// Show the postpone history of a task
    PostponeLog { task_id: i64 },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("Failed to encode output: {0}")]
    OutputError(#[from] serde_json::Error),
}

/// Per-invocation settings shared by every handler
pub struct Context {
    pub user: String,
    pub today: CalendarDay,
    pub json: bool,
    pub default_view: ChartView,
    pub default_color: String,
}

/// Dispatch a parsed command
pub fn run(command: Commands, db: &Database, ctx: &Context) -> Result<(), CliError> {
    match command {
        Commands::AddHabit { name, frequency, days, dates, color, start } => {
            handle_add_habit(name, frequency, days, dates, color, start, db, ctx)
        }
        Commands::ListHabits => handle_list_habits(db, ctx),
        Commands::DeleteHabit { id } => {
            owned_habit(db, ctx, id)?;
            db.delete_habit(id, ctx.today)?;
            println!("Habit {} retired from {}", id, ctx.today);
            Ok(())
        }
        Commands::Check { habit_id, date } => handle_check(habit_id, date, true, db, ctx),
        Commands::Uncheck { habit_id, date } => handle_check(habit_id, date, false, db, ctx),
        Commands::Stats { habit_id } => handle_stats(habit_id, db, ctx),
        Commands::Chart { view } => handle_chart(view, db, ctx),
        Commands::Heatmap { month } => handle_heatmap(month, db, ctx),
        Commands::Day { date } => handle_day(date, db, ctx),
        Commands::AddTask { title, due, description, priority, repeat, every, auto_postpone, subtasks } => {
            let draft = TaskDraft { title, due, description, priority, repeat, every, auto_postpone, subtasks };
            handle_add_task(draft, db, ctx)
        }
        Commands::ListTasks { all } => handle_list_tasks(all, db, ctx),
        Commands::CompleteTask { id } => handle_complete_task(id, db, ctx),
        Commands::ReopenTask { id } => {
            owned_task(db, ctx, id)?;
            let task = db.reopen_task(id)?;
            emit(ctx, &task, || println!("Task {} reopened", id))
        }
        Commands::DeleteTask { id } => {
            owned_task(db, ctx, id)?;
            db.delete_task(id)?;
            println!("Task {} deleted", id);
            Ok(())
        }
        Commands::Postpone => {
            let result = postpone::run_for_user(db, &ctx.user, ctx.today)?;
            emit(ctx, &result, || {
                println!("Postponed {} task(s) to {}", result.postponed_count, ctx.today);
            })
        }
        Commands::PostponeLog { task_id } => {
            owned_task(db, ctx, task_id)?;
            let log = db.postpone_log(task_id)?;
            emit(ctx, &log, || {
                if log.is_empty() {
                    println!("Task {} has never been postponed", task_id);
                }
                for entry in &log {
                    println!("{} -> {} ({})", entry.from_date, entry.to_date, entry.reason);
                }
            })
        }
    }
}

fn emit<T: Serialize>(ctx: &Context, value: &T, human: impl FnOnce()) -> Result<(), CliError> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

fn parse_day_or_today(date: Option<String>, ctx: &Context) -> Result<CalendarDay, CliError> {
    match date {
        Some(text) => Ok(CalendarDay::parse(&text)?),
        None => Ok(ctx.today),
    }
}

fn owned_habit(db: &Database, ctx: &Context, id: i64) -> Result<Habit, CliError> {
    let habit = db.get_habit(id)?;
    if habit.user_id != ctx.user {
        return Err(TrackerError::NotFound(format!("Habit {}", id)).into());
    }
    Ok(habit)
}

fn owned_task(db: &Database, ctx: &Context, id: i64) -> Result<Task, CliError> {
    let task = db.get_task(id)?;
    if task.user_id != ctx.user {
        return Err(TrackerError::NotFound(format!("Task {}", id)).into());
    }
    Ok(task)
}

/// Handle the add-habit command
#[allow(clippy::too_many_arguments)]
fn handle_add_habit(
    name: String,
    frequency: String,
    days: Option<String>,
    dates: Option<String>,
    color: Option<String>,
    start: Option<String>,
    db: &Database,
    ctx: &Context,
) -> Result<(), CliError> {
    let frequency: Frequency = frequency.parse()?;
    let created_at = parse_day_or_today(start, ctx)?;

    let mut habit = Habit::new(ctx.user.clone(), name, frequency, created_at);
    habit.color = color.unwrap_or_else(|| ctx.default_color.clone());
    if let Some(days) = days {
        habit.weekly_days = parse_weekdays(&days)?;
    }
    if let Some(dates) = dates {
        habit.monthly_dates = parse_month_days(&dates)?;
    }

    let id = db.insert_habit(&habit)?;
    println!("Habit created successfully (ID: {})", id);
    Ok(())
}

#[derive(Serialize)]
struct HabitRow {
    #[serde(flatten)]
    habit: Habit,
    due_today: bool,
    current_streak: u32,
    completed_today: bool,
}

/// Habits alive on `ctx.today`, with their status for that day
fn habit_rows(db: &Database, ctx: &Context) -> Result<Vec<HabitRow>, CliError> {
    let mut rows = Vec::new();
    for habit in db.get_habits(&ctx.user)? {
        if !crate::schedule::is_alive_on(&habit, ctx.today) {
            continue;
        }
        let Some(id) = habit.id else { continue };
        let stats = compute_streaks(&habit, &db.get_completions(id)?, ctx.today);
        rows.push(HabitRow {
            due_today: crate::schedule::is_due(&habit, ctx.today),
            current_streak: stats.current_streak,
            completed_today: stats.completed_today,
            habit,
        });
    }
    Ok(rows)
}

fn handle_list_habits(db: &Database, ctx: &Context) -> Result<(), CliError> {
    let rows = habit_rows(db, ctx)?;
    emit(ctx, &rows, || {
        for row in &rows {
            let mark = match (row.due_today, row.completed_today) {
                (_, true) => "x",
                (true, false) => " ",
                (false, false) => "-",
            };
            println!(
                "[{}] {:>4}  {:<24} {:<8} streak {}",
                mark,
                row.habit.id.unwrap_or_default(),
                row.habit.name,
                row.habit.frequency.as_str(),
                row.current_streak
            );
        }
    })
}

fn handle_check(habit_id: i64, date: Option<String>, done: bool, db: &Database, ctx: &Context) -> Result<(), CliError> {
    owned_habit(db, ctx, habit_id)?;
    let day = parse_day_or_today(date, ctx)?;
    if done {
        db.log_completion(habit_id, day)?;
        println!("Habit {} done for {}", habit_id, day);
    } else if db.remove_completion(habit_id, day)? {
        println!("Habit {} unchecked for {}", habit_id, day);
    } else {
        println!("Habit {} had no completion on {}", habit_id, day);
    }
    Ok(())
}

fn handle_stats(habit_id: i64, db: &Database, ctx: &Context) -> Result<(), CliError> {
    let habit = owned_habit(db, ctx, habit_id)?;
    let stats = compute_streaks(&habit, &db.get_completions(habit_id)?, ctx.today);
    emit(ctx, &stats, || {
        println!("{}", habit.name);
        println!("  current streak:    {}", stats.current_streak);
        println!("  longest streak:    {}", stats.longest_streak);
        println!("  total completions: {}", stats.total_completions);
        if let Some(last) = stats.last_completed {
            println!("  last completed:    {}", last);
        }
    })
}

fn handle_chart(view: Option<String>, db: &Database, ctx: &Context) -> Result<(), CliError> {
    let view = match view {
        Some(text) => text.parse::<ChartView>()?,
        None => ctx.default_view,
    };
    let habits = db.get_habits(&ctx.user)?;
    let completions = db.get_user_completions(&ctx.user)?;
    let points = Snapshot::new(&habits, &completions).chart_series(view, ctx.today);

    emit(ctx, &points, || {
        for point in &points {
            let bar = "#".repeat((point.rate / 5) as usize);
            println!("{:>7} {:>3}% {}", point.label, point.rate, bar);
        }
    })
}

fn handle_heatmap(month: Option<String>, db: &Database, ctx: &Context) -> Result<(), CliError> {
    let month = match month {
        Some(text) => YearMonth::parse(&text)?,
        None => ctx.today.year_month(),
    };
    let habits = db.get_habits(&ctx.user)?;
    let completions = db.get_user_completions(&ctx.user)?;
    let cells = Snapshot::new(&habits, &completions).heatmap_month(month);

    emit(ctx, &cells, || {
        println!("{}", month);
        for cell in &cells {
            println!(
                "{}  {:>3}%  {}/{}",
                cell.date, cell.rate, cell.completed, cell.scheduled
            );
        }
    })
}

fn handle_day(date: Option<String>, db: &Database, ctx: &Context) -> Result<(), CliError> {
    let day = parse_day_or_today(date, ctx)?;
    let habits = db.get_habits(&ctx.user)?;
    let completions = db.get_user_completions(&ctx.user)?;
    let detail = Snapshot::new(&habits, &completions).heatmap_day_detail(day);

    emit(ctx, &detail, || {
        println!("{}", detail.date);
        for habit in &detail.habits {
            let mark = if habit.completed { "x" } else { " " };
            println!("[{}] {:>4}  {} ({})", mark, habit.id, habit.name, habit.color);
        }
    })
}

/// Fields of the add-task command
pub struct TaskDraft {
    pub title: String,
    pub due: Option<String>,
    pub description: Option<String>,
    pub priority: String,
    pub repeat: String,
    pub every: Option<String>,
    pub auto_postpone: bool,
    pub subtasks: Vec<String>,
}

/// Validate an add-task request into an unsaved task
pub fn build_task(draft: TaskDraft, user: &str) -> Result<Task, TrackerError> {
    let recurrence: RecurrenceKind = draft.repeat.parse()?;
    let recurrence_rule = match draft.every {
        Some(text) => Some(text.parse::<RecurrenceRule>()?),
        None => None,
    };
    if recurrence == RecurrenceKind::Custom && recurrence_rule.is_none() {
        return Err(TrackerError::InvalidInput(
            "custom repeats need --every, e.g. --every 3d".to_string(),
        ));
    }

    let mut task = Task::new(user.to_string(), draft.title);
    task.description = draft.description;
    task.priority = draft.priority.parse::<Priority>()?;
    task.due_date = draft.due.as_deref().map(CalendarDay::parse).transpose()?;
    task.recurrence = recurrence;
    task.recurrence_rule = recurrence_rule;
    task.auto_postpone = draft.auto_postpone;
    task.subtasks = draft
        .subtasks
        .into_iter()
        .enumerate()
        .map(|(position, title)| SubTask::new(title, position as i64))
        .collect();
    Ok(task)
}

/// Handle the add-task command
fn handle_add_task(draft: TaskDraft, db: &Database, ctx: &Context) -> Result<(), CliError> {
    let task = build_task(draft, &ctx.user)?;
    let id = db.insert_task(&task)?;
    println!("Task created successfully (ID: {})", id);
    Ok(())
}

fn handle_list_tasks(all: bool, db: &Database, ctx: &Context) -> Result<(), CliError> {
    let tasks = db.get_tasks(&ctx.user, all)?;
    emit(ctx, &tasks, || {
        for task in &tasks {
            let mark = if task.is_completed() { "x" } else { " " };
            let due = task.due_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
            let overdue = match task.due_date {
                Some(d) if d < ctx.today && !task.is_completed() => " (overdue)",
                _ => "",
            };
            println!(
                "[{}] {:>4}  {:<10} {:<6} {}{}",
                mark,
                task.id.unwrap_or_default(),
                due,
                task.priority.as_str(),
                task.title,
                overdue
            );
            for sub in &task.subtasks {
                let sub_mark = if sub.completed_at.is_some() { "x" } else { " " };
                println!("        [{}] {}", sub_mark, sub.title);
            }
        }
    })
}

fn handle_complete_task(id: i64, db: &Database, ctx: &Context) -> Result<(), CliError> {
    owned_task(db, ctx, id)?;
    let outcome = db.complete_task(id, Utc::now(), ctx.today)?;
    let successor = outcome.successor.as_ref();
    emit(ctx, &successor, || {
        if !outcome.transitioned {
            println!("Task {} was already completed", id);
            return;
        }
        println!("Task {} completed", id);
        if let Some(next) = successor {
            let due = next.due_date.map(|d| d.to_string()).unwrap_or_default();
            println!("Next occurrence created (ID: {}, due {})", next.id.unwrap_or_default(), due);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(repeat: &str, every: Option<&str>) -> TaskDraft {
        TaskDraft {
            title: "Backup".to_string(),
            due: Some("2025-04-01".to_string()),
            description: None,
            priority: "high".to_string(),
            repeat: repeat.to_string(),
            every: every.map(str::to_string),
            auto_postpone: true,
            subtasks: vec!["Disk".to_string(), "Cloud".to_string()],
        }
    }

    #[test]
    fn builds_custom_recurring_task() {
        let task = build_task(draft("custom", Some("2w")), "u1").unwrap();
        assert_eq!(task.recurrence, RecurrenceKind::Custom);
        assert_eq!(task.recurrence_rule.unwrap().to_string(), "2w");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.subtasks[1].position, 1);
        assert!(task.auto_postpone);
    }

    #[test]
    fn custom_repeat_requires_interval() {
        assert!(matches!(
            build_task(draft("custom", None), "u1"),
            Err(TrackerError::InvalidInput(_))
        ));
    }

    #[test]
    fn malformed_due_date_is_rejected() {
        let mut bad = draft("none", None);
        bad.due = Some("April 1st".to_string());
        assert!(matches!(build_task(bad, "u1"), Err(TrackerError::InvalidInput(_))));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["cadence", "stats", "3", "--today", "2025-01-02", "--json"]).unwrap();
        assert_eq!(cli.today.as_deref(), Some("2025-01-02"));
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Stats { habit_id: 3 }));
    }

    #[test]
    fn habit_listing_follows_lifecycle_window() {
        let db = Database::open_in_memory().unwrap();
        let day = |s: &str| CalendarDay::parse(s).unwrap();
        let kept = db
            .insert_habit(&Habit::new("u1".to_string(), "Stretch".to_string(), Frequency::Daily, day("2025-01-01")))
            .unwrap();
        let retired = db
            .insert_habit(&Habit::new("u1".to_string(), "Run".to_string(), Frequency::Daily, day("2025-01-01")))
            .unwrap();
        db.insert_habit(&Habit::new("u1".to_string(), "Later".to_string(), Frequency::Daily, day("2025-02-01")))
            .unwrap();
        db.delete_habit(retired, day("2025-01-10")).unwrap();

        let ctx = |today: &str| Context {
            user: "u1".to_string(),
            today: day(today),
            json: true,
            default_view: ChartView::Weekly,
            default_color: "blue".to_string(),
        };
        let ids = |today: &str| -> Vec<i64> {
            habit_rows(&db, &ctx(today)).unwrap().iter().filter_map(|r| r.habit.id).collect()
        };

        assert_eq!(ids("2025-01-09"), vec![kept, retired]);
        assert_eq!(ids("2025-01-10"), vec![kept]);
    }
}
