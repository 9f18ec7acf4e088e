pub mod analytics;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod postpone;
pub mod recurrence;
pub mod schedule;
pub mod streak;
pub mod utils;

pub use calendar::{CalendarDay, YearMonth};
pub use config::Config;
pub use database::Database;
pub use error::TrackerError;
pub use logging::init_logging;
pub use models::{Completion, Habit, PostponeEntry, SubTask, Task};
pub use utils::Profile;
