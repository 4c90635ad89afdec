//! Migration script execution.
//!
//! A script is run either as one unit or, in multi-statement mode, split on a
//! separator token and run fragment by fragment. Splitting is purely textual:
//! a separator inside a string literal or trigger body splits too, so scripts
//! containing such bodies should pick a separator that does not occur in them.

use std::time::Duration;

use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::connection::bounded;
use crate::error::{MigrateError, Result};

/// Longest statement excerpt carried in an execution error.
const MAX_STATEMENT_EXCERPT: usize = 120;

/// Splits a script on `separator`, dropping empty and whitespace-only
/// fragments.
#[must_use]
pub fn split_statements<'a>(script: &'a str, separator: &str) -> Vec<&'a str> {
    script
        .split(separator)
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect()
}

fn excerpt(statement: &str) -> String {
    match statement.char_indices().nth(MAX_STATEMENT_EXCERPT) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => statement.to_string(),
    }
}

/// Runs migration scripts against a pool.
#[derive(Debug, Clone)]
pub struct StatementExecutor {
    pool: SqlitePool,
    separator: Option<String>,
    deadline: Option<Duration>,
}

impl StatementExecutor {
    /// Creates an executor that runs each script as a single unit.
    pub fn new(pool: SqlitePool, deadline: Option<Duration>) -> Self {
        Self {
            pool,
            separator: None,
            deadline,
        }
    }

    /// Enables multi-statement mode.
    #[must_use]
    pub fn multi_statement(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// Runs a migration script.
    ///
    /// On failure the error carries the zero-based index of the failing
    /// fragment; fragments before it stay applied.
    pub async fn run(&self, script: &[u8]) -> Result<()> {
        let script = std::str::from_utf8(script).map_err(|e| MigrateError::Execution {
            index: 0,
            statement: String::new(),
            message: format!("script is not valid UTF-8: {e}"),
        })?;

        let fragments = match &self.separator {
            Some(separator) => split_statements(script, separator),
            None if script.trim().is_empty() => Vec::new(),
            None => vec![script],
        };

        for (index, fragment) in fragments.iter().enumerate() {
            debug!(index, sql = %fragment, "Executing statement");
            self.execute(index, fragment).await?;
        }
        Ok(())
    }

    async fn execute(&self, index: usize, statement: &str) -> Result<()> {
        bounded(self.deadline, async {
            sqlx::raw_sql(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MigrateError::Execution {
                    index,
                    statement: excerpt(statement),
                    message: e.to_string(),
                })?;
            Ok(())
        })
        .await
    }
}
