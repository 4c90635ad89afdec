//! Version tracking table management.
//!
//! The tracking table has exactly two columns, `version` and `dirty`, and
//! holds at most one row. Creation is idempotent and safe when many drivers
//! sharing a pool initialize at the same time.

use std::time::Duration;

use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::connection::bounded;
use crate::error::{MigrateError, Result};

/// Quotes an identifier (schema, table or column name).
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns the schema-qualified, quoted name of a table.
#[must_use]
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// Returns whether a database error reports that the object already exists.
pub(crate) fn is_already_exists(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("already exists"))
}

/// Checks whether `table` exists in `schema`.
pub(crate) async fn table_exists(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
    deadline: Option<Duration>,
) -> Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?",
        quote_identifier(schema)
    );
    bounded(deadline, async {
        let row: (i64,) = sqlx::query_as(&sql)
            .bind(table)
            .fetch_one(pool)
            .await
            .map_err(|e| MigrateError::table(qualified_name(schema, table), e))?;
        Ok(row.0 > 0)
    })
    .await
}

/// Runs a `CREATE TABLE` statement, treating a concurrent creation of the
/// same table as success.
pub(crate) async fn create_table(
    pool: &SqlitePool,
    qualified: &str,
    ddl: &str,
    deadline: Option<Duration>,
) -> Result<()> {
    bounded(deadline, async {
        match sqlx::query(ddl).execute(pool).await {
            Ok(_) => {
                info!(table = %qualified, "Created table");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                debug!(table = %qualified, "Table created concurrently, continuing");
                Ok(())
            }
            Err(e) => Err(MigrateError::table(qualified, e)),
        }
    })
    .await
}

/// Manages the version tracking table.
#[derive(Debug, Clone)]
pub struct MigrationsTable {
    pool: SqlitePool,
    schema: String,
    table: String,
    deadline: Option<Duration>,
}

impl MigrationsTable {
    /// Creates a manager for `schema.table`.
    pub fn new(
        pool: SqlitePool,
        schema: impl Into<String>,
        table: impl Into<String>,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            pool,
            schema: schema.into(),
            table: table.into(),
            deadline,
        }
    }

    /// Returns the quoted, schema-qualified table name.
    #[must_use]
    pub fn qualified(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }

    /// Returns the unquoted table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.table
    }

    /// Returns whether the tracking table exists.
    pub async fn exists(&self) -> Result<bool> {
        table_exists(&self.pool, &self.schema, &self.table, self.deadline).await
    }

    /// Ensures the tracking table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        if self.exists().await? {
            return Ok(());
        }
        let ddl = format!(
            "CREATE TABLE {} (version BIGINT, dirty BOOLEAN NOT NULL)",
            self.qualified()
        );
        create_table(&self.pool, &self.qualified(), &ddl, self.deadline).await
    }

    /// Drops the tracking table if present.
    pub async fn drop_table(&self) -> Result<()> {
        let qualified = self.qualified();
        bounded(self.deadline, async {
            sqlx::query(&format!("DROP TABLE IF EXISTS {qualified}"))
                .execute(&self.pool)
                .await
                .map_err(|e| MigrateError::table(&qualified, e))?;
            Ok(())
        })
        .await?;
        info!(table = %qualified, "Dropped tracking table");
        Ok(())
    }
}
