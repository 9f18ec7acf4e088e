use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::calendar::CalendarDay;
use crate::models::{Completion, Habit, PostponeEntry, SubTask, Task};
use crate::postpone::{AUTO_REASON, PostponeChange, PostponeStore};
use crate::recurrence;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Failed to encode column: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of marking a task complete
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub task: Task,
    /// False when the task was already completed and nothing changed
    pub transitioned: bool,
    pub successor: Option<Task>,
}

pub struct Database {
    conn: Connection,
}

const HABIT_COLUMNS: &str =
    "id, user_id, name, color, frequency, weekly_days, monthly_dates, created_at, deleted_at";

const TASK_COLUMNS: &str = "id, user_id, title, description, priority, due_date, original_due_date, recurrence, \
     recurrence_rule, completed_at, auto_postpone, successor_id, deleted_at, created_at, updated_at";

impl Database {
    /// Create a new database connection and initialize the schema
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(path);

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        let db = Database { conn };
        db.initialize_schema()?;
        info!(path = %db_path.display(), "database opened");

        Ok(db)
    }

    /// In-memory database with the full schema, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize the database schema (tables and indexes)
    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS habits (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         TEXT NOT NULL,
                name            TEXT NOT NULL,
                color           TEXT NOT NULL DEFAULT 'blue',
                frequency       TEXT NOT NULL,
                weekly_days     TEXT NOT NULL DEFAULT '[]',
                monthly_dates   TEXT NOT NULL DEFAULT '[]',
                created_at      TEXT NOT NULL,
                deleted_at      TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS completions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                habit_id        INTEGER NOT NULL REFERENCES habits(id),
                day             TEXT NOT NULL,
                deleted_at      TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             TEXT NOT NULL,
                title               TEXT NOT NULL,
                description         TEXT,
                priority            TEXT NOT NULL DEFAULT 'medium',
                due_date            TEXT,
                original_due_date   TEXT,
                recurrence          TEXT NOT NULL DEFAULT 'none',
                recurrence_rule     TEXT,
                completed_at        TEXT,
                auto_postpone       INTEGER NOT NULL DEFAULT 0,
                deleted_at          TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS subtasks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id         INTEGER NOT NULL REFERENCES tasks(id),
                title           TEXT NOT NULL,
                position        INTEGER NOT NULL,
                completed_at    TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS postpone_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id         INTEGER NOT NULL REFERENCES tasks(id),
                from_date       TEXT NOT NULL,
                to_date         TEXT NOT NULL,
                reason          TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )",
            [],
        )?;

        // At most one live completion per habit and day
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_completions_live
             ON completions(habit_id, day) WHERE deleted_at IS NULL",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_habits_user_id ON habits(user_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_due ON tasks(user_id, due_date)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_subtasks_task_id ON subtasks(task_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_postpone_log_task_id ON postpone_log(task_id)",
            [],
        )?;

        self.migrate_add_successor_id()?;

        Ok(())
    }

    /// Migrate existing tasks table to add the successor_id column
    fn migrate_add_successor_id(&self) -> Result<(), DatabaseError> {
        fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
            let mut stmt = conn.prepare(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2"
            )?;
            let count: i64 = stmt.query_row(rusqlite::params![table, column], |row| row.get(0))?;
            Ok(count > 0)
        }

        if !column_exists(&self.conn, "tasks", "successor_id")? {
            debug!("adding tasks.successor_id column");
            self.conn.execute(
                "ALTER TABLE tasks ADD COLUMN successor_id INTEGER",
                [],
            )?;
        }

        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a habit and return its ID
    pub fn insert_habit(&self, habit: &Habit) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO habits (user_id, name, color, frequency, weekly_days, monthly_dates, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                habit.user_id,
                habit.name,
                habit.color,
                habit.frequency.as_str(),
                serde_json::to_string(&habit.weekly_days)?,
                serde_json::to_string(&habit.monthly_dates)?,
                habit.created_at,
                habit.deleted_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn row_to_habit(row: &rusqlite::Row) -> Result<Habit, rusqlite::Error> {
        Ok(Habit {
            id: Some(row.get(0)?),
            user_id: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
            frequency: parse_column(row, 4)?,
            weekly_days: json_column(row, 5)?,
            monthly_dates: json_column(row, 6)?,
            created_at: row.get(7)?,
            deleted_at: row.get(8)?,
        })
    }

    pub fn get_habit(&self, id: i64) -> Result<Habit, DatabaseError> {
        let sql = format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?1");
        self.conn
            .query_row(&sql, rusqlite::params![id], Self::row_to_habit)
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("Habit {}", id)))
    }

    /// All habits of a user, retired ones included; the schedule decides what is due
    pub fn get_habits(&self, user_id: &str) -> Result<Vec<Habit>, DatabaseError> {
        let sql = format!("SELECT {HABIT_COLUMNS} FROM habits WHERE user_id = ?1 ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let habits = stmt.query_map(rusqlite::params![user_id], Self::row_to_habit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(habits)
    }

    /// Retire a habit; it stops being scheduled on `day`
    pub fn delete_habit(&self, id: i64, day: CalendarDay) -> Result<(), DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE habits SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![day, id],
        )?;
        if updated == 0 {
            // either missing or already retired
            self.get_habit(id)?;
        }
        Ok(())
    }

    /// Record a completion for `day`. Logging a day twice returns the existing row.
    pub fn log_completion(&self, habit_id: i64, day: CalendarDay) -> Result<i64, DatabaseError> {
        self.get_habit(habit_id)?;
        let tx = self.conn.unchecked_transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM completions WHERE habit_id = ?1 AND day = ?2 AND deleted_at IS NULL",
                rusqlite::params![habit_id, day],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO completions (habit_id, day) VALUES (?1, ?2)",
                    rusqlite::params![habit_id, day],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.commit()?;
        Ok(id)
    }

    /// Soft-delete the live completion for `day`; returns whether one existed
    pub fn remove_completion(&self, habit_id: i64, day: CalendarDay) -> Result<bool, DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE completions SET deleted_at = ?1 WHERE habit_id = ?2 AND day = ?3 AND deleted_at IS NULL",
            rusqlite::params![Utc::now(), habit_id, day],
        )?;
        Ok(updated > 0)
    }

    fn row_to_completion(row: &rusqlite::Row) -> Result<Completion, rusqlite::Error> {
        Ok(Completion {
            id: Some(row.get(0)?),
            habit_id: row.get(1)?,
            day: row.get(2)?,
            deleted_at: row.get(3)?,
        })
    }

    /// Live completions of one habit, oldest first
    pub fn get_completions(&self, habit_id: i64) -> Result<Vec<Completion>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, habit_id, day, deleted_at FROM completions
             WHERE habit_id = ?1 AND deleted_at IS NULL ORDER BY day ASC"
        )?;
        let completions = stmt.query_map(rusqlite::params![habit_id], Self::row_to_completion)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(completions)
    }

    /// Live completions across every habit of a user
    pub fn get_user_completions(&self, user_id: &str) -> Result<Vec<Completion>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.habit_id, c.day, c.deleted_at FROM completions c
             JOIN habits h ON h.id = c.habit_id
             WHERE h.user_id = ?1 AND c.deleted_at IS NULL ORDER BY c.day ASC"
        )?;
        let completions = stmt.query_map(rusqlite::params![user_id], Self::row_to_completion)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(completions)
    }

    /// Insert a task with its subtasks and return its ID
    pub fn insert_task(&self, task: &Task) -> Result<i64, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let id = insert_task_rows(&tx, task)?;
        tx.commit()?;
        Ok(id)
    }

    fn row_to_task(row: &rusqlite::Row) -> Result<Task, rusqlite::Error> {
        let rule: Option<String> = row.get(8)?;
        let recurrence_rule = match rule {
            Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e))
            })?),
            None => None,
        };
        Ok(Task {
            id: Some(row.get(0)?),
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            priority: parse_column(row, 4)?,
            due_date: row.get(5)?,
            original_due_date: row.get(6)?,
            recurrence: parse_column(row, 7)?,
            recurrence_rule,
            completed_at: row.get(9)?,
            auto_postpone: row.get::<_, i64>(10)? != 0,
            successor_id: row.get(11)?,
            subtasks: Vec::new(),
            deleted_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    /// Get a single task with its subtasks
    pub fn get_task(&self, id: i64) -> Result<Task, DatabaseError> {
        load_task(&self.conn, id)
    }

    /// Tasks of a user that are not deleted, ordered by due date (undated last)
    pub fn get_tasks(&self, user_id: &str, include_completed: bool) -> Result<Vec<Task>, DatabaseError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE user_id = ?1 AND deleted_at IS NULL AND (?2 OR completed_at IS NULL)
             ORDER BY due_date IS NULL, due_date ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut tasks = stmt.query_map(rusqlite::params![user_id, include_completed], Self::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        for task in &mut tasks {
            if let Some(id) = task.id {
                task.subtasks = load_subtasks(&self.conn, id)?;
            }
        }
        Ok(tasks)
    }

    /// Mark a task complete and, on the first completion, spawn its next instance.
    ///
    /// Completing an already-completed task changes nothing. The completion
    /// stamp and the successor (with its subtasks) commit together.
    pub fn complete_task(&self, id: i64, now: DateTime<Utc>, today: CalendarDay) -> Result<TaskCompletion, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut task = load_task(&tx, id)?;

        if task.is_completed() {
            debug!(task_id = id, "task already completed");
            return Ok(TaskCompletion {
                task,
                transitioned: false,
                successor: None,
            });
        }

        task.completed_at = Some(now);
        task.updated_at = now;

        let mut successor = match task.successor_id {
            Some(_) => None,
            None => recurrence::advance(&task, today),
        };
        if let Some(next) = successor.as_mut() {
            let next_id = insert_task_rows(&tx, next)?;
            next.id = Some(next_id);
            task.successor_id = Some(next_id);
        }

        tx.execute(
            "UPDATE tasks SET completed_at = ?1, successor_id = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![task.completed_at, task.successor_id, task.updated_at, id],
        )?;
        tx.commit()?;

        info!(
            task_id = id,
            successor_id = ?task.successor_id,
            "task completed"
        );
        Ok(TaskCompletion {
            task,
            transitioned: true,
            successor,
        })
    }

    /// Clear a task's completion without touching its successor
    pub fn reopen_task(&self, id: i64) -> Result<Task, DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE tasks SET completed_at = NULL, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![Utc::now(), id],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("Task {}", id)));
        }
        self.get_task(id)
    }

    /// Soft-delete a task
    pub fn delete_task(&self, id: i64) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let updated = self.conn.execute(
            "UPDATE tasks SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now, id],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("Task {}", id)));
        }
        Ok(())
    }

    /// Audit entries of one task, oldest first
    pub fn postpone_log(&self, task_id: i64) -> Result<Vec<PostponeEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, from_date, to_date, reason, created_at FROM postpone_log
             WHERE task_id = ?1 ORDER BY id ASC"
        )?;
        let entries = stmt.query_map(rusqlite::params![task_id], |row| {
            Ok(PostponeEntry {
                id: Some(row.get(0)?),
                task_id: row.get(1)?,
                from_date: row.get(2)?,
                to_date: row.get(3)?,
                reason: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl PostponeStore for Database {
    fn auto_postpone_candidates(&self, user_id: &str) -> Result<Vec<Task>, DatabaseError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE user_id = ?1 AND auto_postpone = 1 AND completed_at IS NULL
               AND deleted_at IS NULL AND due_date IS NOT NULL
             ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt.query_map(rusqlite::params![user_id], Self::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn apply_postpones(&self, changes: &[PostponeChange]) -> Result<Vec<i64>, DatabaseError> {
        let now = Utc::now();
        let tx = self.conn.unchecked_transaction()?;
        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            // COALESCE keeps an original due date that is already set.
            // A task completed, deleted or already moved since it was read is left alone.
            let updated = tx.execute(
                "UPDATE tasks SET due_date = ?1, original_due_date = COALESCE(original_due_date, ?2), updated_at = ?3
                 WHERE id = ?4 AND due_date = ?5 AND completed_at IS NULL
                   AND deleted_at IS NULL AND auto_postpone = 1",
                rusqlite::params![change.to_date, change.original_due_date, now, change.task_id, change.from_date],
            )?;
            if updated == 0 {
                debug!(task_id = change.task_id, "task changed since it was read, not postponed");
                continue;
            }
            tx.execute(
                "INSERT INTO postpone_log (task_id, from_date, to_date, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![change.task_id, change.from_date, change.to_date, AUTO_REASON, now],
            )?;
            applied.push(change.task_id);
        }
        tx.commit()?;
        Ok(applied)
    }
}

fn insert_task_rows(conn: &Connection, task: &Task) -> Result<i64, DatabaseError> {
    let rule = task
        .recurrence_rule
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO tasks (user_id, title, description, priority, due_date, original_due_date, recurrence,
                            recurrence_rule, completed_at, auto_postpone, successor_id, deleted_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            task.user_id,
            task.title,
            task.description,
            task.priority.as_str(),
            task.due_date,
            task.original_due_date,
            task.recurrence.as_str(),
            rule,
            task.completed_at,
            if task.auto_postpone { 1 } else { 0 },
            task.successor_id,
            task.deleted_at,
            task.created_at,
            task.updated_at,
        ],
    )?;
    let task_id = conn.last_insert_rowid();

    for sub in &task.subtasks {
        conn.execute(
            "INSERT INTO subtasks (task_id, title, position, completed_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![task_id, sub.title, sub.position, sub.completed_at],
        )?;
    }

    Ok(task_id)
}

fn load_task(conn: &Connection, id: i64) -> Result<Task, DatabaseError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND deleted_at IS NULL");
    let mut task = conn
        .query_row(&sql, rusqlite::params![id], Database::row_to_task)
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound(format!("Task {}", id)))?;
    task.subtasks = load_subtasks(conn, id)?;
    Ok(task)
}

fn load_subtasks(conn: &Connection, task_id: i64) -> Result<Vec<SubTask>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, position, completed_at FROM subtasks WHERE task_id = ?1 ORDER BY position ASC, id ASC"
    )?;
    let subtasks = stmt.query_map(rusqlite::params![task_id], |row| {
        Ok(SubTask {
            id: Some(row.get(0)?),
            title: row.get(1)?,
            position: row.get(2)?,
            completed_at: row.get(3)?,
        })
    })?
    .collect::<Result<Vec<_>, _>>()?;
    Ok(subtasks)
}

/// Read a text column through `FromStr`
fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a JSON-encoded text column
fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> Result<T, rusqlite::Error> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
