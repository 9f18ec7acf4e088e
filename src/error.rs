use thiserror::Error;

use crate::database::DatabaseError;

/// Errors surfaced by the scheduling core.
///
/// Configurations that are valid but useless (a weekly habit with no
/// weekdays, a custom recurrence without a rule) are not errors; they
/// evaluate to "never due" or "no next date".
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transaction failed: {0}")]
    TransactionFailure(DatabaseError),
}

impl From<DatabaseError> for TrackerError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => TrackerError::NotFound(what),
            other => TrackerError::TransactionFailure(other),
        }
    }
}
