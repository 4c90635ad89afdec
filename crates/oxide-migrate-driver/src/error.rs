//! Error types for the migration driver.

use std::time::Duration;

/// Errors raised while acquiring or releasing the schema lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another holder kept the lock past the configured timeout.
    #[error("timed out after {timeout:?} waiting for lock '{key}'")]
    Timeout {
        /// Lock key that could not be acquired.
        key: String,
        /// Configured lock timeout.
        timeout: Duration,
    },

    /// This driver already holds the lock; nested locking is not supported.
    #[error("lock '{0}' is already held by this driver")]
    AlreadyHeld(String),

    /// `unlock` was called without a held lock.
    #[error("lock '{0}' is not held by this driver")]
    NotHeld(String),

    /// The lock row disappeared or changed owner while this driver held it.
    #[error("lock '{0}' was lost before it could be released")]
    Lost(String),
}

/// Errors that can occur during driver operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// DSN malformed, unknown scheme, or connection failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid driver configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Schema lock failure.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// A migration statement failed.
    ///
    /// `index` is the zero-based position of the fragment within the script.
    #[error("Migration failed at statement {index} ({statement}): {message}")]
    Execution {
        /// Zero-based fragment ordinal.
        index: usize,
        /// The failing statement, truncated for display.
        statement: String,
        /// Engine error text.
        message: String,
    },

    /// The schema is dirty and needs manual resolution.
    #[error(
        "Dirty database version {}. Fix and force version.",
        .0.map_or_else(|| "none".to_string(), |v| v.to_string())
    )]
    DirtyState(Option<i64>),

    /// Creating, verifying or dropping the tracking table failed.
    #[error("Tracking table '{table}': {message}")]
    TableManagement {
        /// Qualified table name.
        table: String,
        /// Underlying failure.
        message: String,
    },

    /// A database call exceeded its deadline.
    #[error("Database call timed out after {0:?}")]
    Timeout(Duration),

    /// Database error outside the classified cases.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<MigrateError>),
}

impl MigrateError {
    /// Creates a table management error.
    pub fn table(table: impl Into<String>, source: impl std::fmt::Display) -> Self {
        MigrateError::TableManagement {
            table: table.into(),
            message: source.to_string(),
        }
    }

    /// Returns the failing fragment index for execution errors.
    #[must_use]
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            MigrateError::Execution { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
