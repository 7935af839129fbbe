//! Error handling

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Entity store failures
#[derive(Debug, Error)]
pub enum StoreError {
    // Database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // Uniqueness violations (second open disturbance for a line)
    #[error("conflict: {0}")]
    Conflict(String),

    // Backend not reachable / injected failure
    #[error("store unavailable: {0}")]
    Unavailable(String),

    // Stored value could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Population oracle failures
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("population query failed: {0}")]
    Query(String),

    #[error("population store unavailable")]
    Unavailable,
}

impl From<sqlx::Error> for OracleError {
    fn from(err: sqlx::Error) -> Self {
        OracleError::Query(err.to_string())
    }
}

/// Duplicate report for the same (line, submitter) key inside the TTL window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("report rate limited")]
pub struct RateLimited;

/// Report admission failures
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("line {0} is closed")]
    LineClosed(String),

    #[error("unknown line {0}")]
    UnknownLine(String),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures inside the consensus evaluator or the state machine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Notification hand-off / delivery failures
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification queue closed")]
    QueueClosed,

    #[error("notification hand-off timed out after {0}ms")]
    Timeout(u128),
}

/// Official status feed failures
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),
}
