use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calendar::CalendarDay;
use crate::database::DatabaseError;
use crate::error::TrackerError;
use crate::models::Task;

/// Reason recorded on audit entries written by the batch job
pub const AUTO_REASON: &str = "auto";

/// Storage operations the postpone job needs
pub trait PostponeStore {
    /// Open (not completed, not deleted) tasks of `user_id` with auto-postpone on
    fn auto_postpone_candidates(&self, user_id: &str) -> Result<Vec<Task>, DatabaseError>;

    /// Apply every change and its audit entry in one transaction.
    ///
    /// A change only lands if the task is still open, still auto-postponed and
    /// still due on `from_date`. Returns the ids of the tasks that moved.
    fn apply_postpones(&self, changes: &[PostponeChange]) -> Result<Vec<i64>, DatabaseError>;
}

/// One planned due-date shift
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostponeChange {
    pub task_id: i64,
    pub from_date: CalendarDay,
    pub to_date: CalendarDay,
    /// Value `original_due_date` must hold after the update
    pub original_due_date: CalendarDay,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostponeResult {
    pub postponed_count: usize,
    pub postponed_task_ids: Vec<i64>,
}

/// Whether the batch job should move `task` on `today`.
///
/// Only strictly overdue tasks qualify, so a task already moved to today is
/// left alone by a second run.
pub fn is_eligible(task: &Task, today: CalendarDay) -> bool {
    task.auto_postpone
        && task.id.is_some()
        && !task.is_completed()
        && task.deleted_at.is_none()
        && task.due_date.is_some_and(|due| due < today)
}

pub fn plan_postpones(tasks: &[Task], today: CalendarDay) -> Vec<PostponeChange> {
    tasks
        .iter()
        .filter(|task| is_eligible(task, today))
        .filter_map(|task| {
            let id = task.id?;
            let due = task.due_date?;
            Some(PostponeChange {
                task_id: id,
                from_date: due,
                to_date: today,
                original_due_date: task.original_due_date.unwrap_or(due),
            })
        })
        .collect()
}

/// Move every overdue auto-postpone task of `user_id` to `today`.
///
/// Nothing is written, and no transaction is opened, when no task is
/// eligible. Otherwise all updates and audit entries commit together.
pub fn run_for_user<S: PostponeStore>(store: &S, user_id: &str, today: CalendarDay) -> Result<PostponeResult, TrackerError> {
    let candidates = store.auto_postpone_candidates(user_id)?;
    let changes = plan_postpones(&candidates, today);

    if changes.is_empty() {
        debug!(user_id, %today, candidates = candidates.len(), "no overdue tasks to postpone");
        return Ok(PostponeResult::default());
    }

    let ids = match store.apply_postpones(&changes) {
        Ok(ids) => ids,
        Err(e) => {
            warn!(user_id, %today, error = %e, "postpone batch rolled back");
            return Err(TrackerError::TransactionFailure(e));
        }
    };

    if ids.len() < changes.len() {
        debug!(user_id, planned = changes.len(), applied = ids.len(), "tasks changed since they were read");
    }
    info!(user_id, %today, count = ids.len(), "postponed overdue tasks");
    Ok(PostponeResult {
        postponed_count: ids.len(),
        postponed_task_ids: ids,
    })
}
