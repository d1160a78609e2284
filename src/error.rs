//! # Error Types
//!
//! One error enum for the whole crate. Errors are cloned into every future and
//! subscriber that observes a failed task, so variants carry owned context
//! rather than boxed sources.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AsyncSqlError {
    /// Every bounded connection attempt failed.
    #[error("Connection establishment failed after {attempts} attempt(s): {reason}")]
    ConnectionEstablishment { attempts: u32, reason: String },

    /// A queued task failed while running against the database handle.
    #[error("Task execution error: {0}")]
    TaskExecution(String),

    /// A task ran while the connection had no live handle.
    #[error("Connection has no live database handle")]
    NotConnected,

    /// A cached key outlived its backing record.
    #[error("Cache consistency error: no row in `{table}` for key `{key}`")]
    CacheConsistency { table: String, key: String },

    /// A resolver was asked about a column it was not configured for.
    #[error("Unrecognized column: {column}")]
    UnrecognizedColumn { column: String },

    /// A value could not be encoded or decoded for its column.
    #[error("Invalid value for column `{column}`: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Work item already registered: {0}")]
    DuplicateWorkItem(String),

    #[error("Scheduler is not running")]
    SchedulerNotRunning,

    #[error("Failed to spawn scheduler thread: {0}")]
    SchedulerSpawn(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Some rows of a bulk cache operation failed; the rest were applied.
    #[error("{operation} failed for {failed} of {total} item(s)")]
    PartialFailure {
        operation: String,
        failed: usize,
        total: usize,
    },
}

impl AsyncSqlError {
    /// Whether a reconnect-and-resubmit may clear this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AsyncSqlError::TaskExecution(_) | AsyncSqlError::NotConnected
        )
    }

    pub(crate) fn task(err: impl std::fmt::Display) -> Self {
        AsyncSqlError::TaskExecution(err.to_string())
    }
}

impl From<sqlx::Error> for AsyncSqlError {
    fn from(err: sqlx::Error) -> Self {
        AsyncSqlError::TaskExecution(err.to_string())
    }
}

impl From<config::ConfigError> for AsyncSqlError {
    fn from(err: config::ConfigError) -> Self {
        AsyncSqlError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AsyncSqlError>;
