//! Driver configuration.
//!
//! A [`Config`] is fixed once a driver is constructed. It can be built in code
//! with the `with_*` methods or lifted from the `x-` query parameters of a DSN.

use std::time::Duration;

use crate::error::{MigrateError, Result};

/// Default name of the version tracking table.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Default statement separator for multi-statement scripts.
pub const DEFAULT_MULTI_STATEMENT_SEPARATOR: &str = ";";

/// Default time to wait for the schema lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Schema used when neither the config nor the DSN names one.
pub const DEFAULT_SCHEMA: &str = "main";

/// DSN parameter names understood by the driver.
pub mod params {
    /// Tracking table name.
    pub const MIGRATIONS_TABLE: &str = "x-migrations-table";
    /// Enables multi-statement mode.
    pub const MULTI_STATEMENT: &str = "x-multi-statement";
    /// Separator token for multi-statement mode.
    pub const MULTI_STATEMENT_SEPARATOR: &str = "x-multi-statement-separator";
    /// Target schema. Anything other than `main` or `temp` must already be
    /// attached on every pooled connection.
    pub const SCHEMA: &str = "x-schema";
    /// Lock timeout in milliseconds.
    pub const LOCK_TIMEOUT: &str = "x-lock-timeout";
    /// Per-call deadline in milliseconds, `0` disables it.
    pub const STATEMENT_TIMEOUT: &str = "x-statement-timeout";

    /// Returns whether the parameter is consumed by the driver.
    #[must_use]
    pub fn is_driver_param(name: &str) -> bool {
        name.starts_with("x-")
    }
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the version tracking table.
    pub migrations_table: String,
    /// Split scripts on `multi_statement_separator` before executing.
    pub multi_statement_enabled: bool,
    /// Token separating statements in multi-statement mode.
    pub multi_statement_separator: String,
    /// Target schema; `None` uses the connection's own schema.
    pub schema_name: Option<String>,
    /// Upper bound on waiting for the schema lock.
    pub lock_timeout: Duration,
    /// Deadline applied to every database call.
    pub statement_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            multi_statement_enabled: false,
            multi_statement_separator: DEFAULT_MULTI_STATEMENT_SEPARATOR.to_string(),
            schema_name: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            statement_timeout: None,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tracking table name.
    #[must_use]
    pub fn with_migrations_table(mut self, name: impl Into<String>) -> Self {
        self.migrations_table = name.into();
        self
    }

    /// Enables multi-statement mode with the given separator.
    #[must_use]
    pub fn with_multi_statement(mut self, separator: impl Into<String>) -> Self {
        self.multi_statement_enabled = true;
        self.multi_statement_separator = separator.into();
        self
    }

    /// Sets the target schema.
    ///
    /// SQLite schemas are attached databases. A schema other than `main` or
    /// `temp` must be `ATTACH`ed on each connection of the pool, for example
    /// from `SqlitePoolOptions::after_connect`, before the driver is opened;
    /// otherwise creating the tracking table fails with
    /// [`MigrateError::TableManagement`].
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema_name = Some(schema.into());
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Returns the schema to operate on.
    #[must_use]
    pub fn schema(&self) -> &str {
        self.schema_name.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    /// Rejects invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.migrations_table.trim().is_empty() {
            return Err(MigrateError::Config(
                "migrations table name must not be empty".into(),
            ));
        }
        if self.multi_statement_enabled && self.multi_statement_separator.is_empty() {
            return Err(MigrateError::Config(
                "multi-statement separator must not be empty".into(),
            ));
        }
        if matches!(&self.schema_name, Some(schema) if schema.trim().is_empty()) {
            return Err(MigrateError::Config("schema name must not be empty".into()));
        }
        if self.lock_timeout.is_zero() {
            return Err(MigrateError::Config("lock timeout must be positive".into()));
        }
        Ok(())
    }

    /// Applies one DSN parameter on top of this configuration.
    ///
    /// Returns `Ok(false)` when the parameter is not a driver parameter.
    pub fn apply_param(&mut self, name: &str, value: &str) -> Result<bool> {
        match name {
            params::MIGRATIONS_TABLE => self.migrations_table = value.to_string(),
            params::MULTI_STATEMENT => self.multi_statement_enabled = parse_bool(name, value)?,
            params::MULTI_STATEMENT_SEPARATOR => {
                self.multi_statement_separator = value.to_string();
            }
            params::SCHEMA => self.schema_name = Some(value.to_string()),
            params::LOCK_TIMEOUT => self.lock_timeout = parse_millis(name, value)?,
            params::STATEMENT_TIMEOUT => {
                let timeout = parse_millis(name, value)?;
                self.statement_timeout = (!timeout.is_zero()).then_some(timeout);
            }
            other if params::is_driver_param(other) => {
                return Err(MigrateError::Config(format!(
                    "unknown driver parameter '{other}'"
                )));
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(MigrateError::Config(format!(
            "parameter '{name}' expects a boolean, got '{value}'"
        ))),
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            MigrateError::Config(format!(
                "parameter '{name}' expects milliseconds, got '{value}'"
            ))
        })
}
