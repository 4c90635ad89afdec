//! Version and dirty-state storage.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::connection::bounded;
use crate::error::Result;
use crate::table::MigrationsTable;

/// The recorded migration state of a schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    /// Last version started or applied; `None` before any migration ran.
    pub version: Option<i64>,
    /// A migration began but did not confirm completion.
    pub dirty: bool,
}

impl VersionRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(version: Option<i64>, dirty: bool) -> Self {
        Self { version, dirty }
    }
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) if self.dirty => write!(f, "{v} (dirty)"),
            Some(v) => write!(f, "{v}"),
            None if self.dirty => write!(f, "none (dirty)"),
            None => write!(f, "none"),
        }
    }
}

/// Reads and writes the version record in the tracking table.
#[derive(Debug, Clone)]
pub struct VersionStore {
    pool: SqlitePool,
    table: MigrationsTable,
    deadline: Option<Duration>,
}

impl VersionStore {
    /// Creates a version store on top of a tracking table.
    pub fn new(pool: SqlitePool, table: MigrationsTable, deadline: Option<Duration>) -> Self {
        Self {
            pool,
            table,
            deadline,
        }
    }

    /// Returns the tracking table manager.
    #[must_use]
    pub fn table(&self) -> &MigrationsTable {
        &self.table
    }

    /// Reads the current version record.
    ///
    /// A missing tracking table reads as no version.
    pub async fn version(&self) -> Result<VersionRecord> {
        if !self.table.exists().await? {
            return Ok(VersionRecord::default());
        }

        let sql = format!("SELECT version, dirty FROM {} LIMIT 1", self.table.qualified());
        bounded(self.deadline, async {
            let row: Option<(Option<i64>, bool)> =
                sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
            Ok(row
                .map(|(version, dirty)| VersionRecord::new(version, dirty))
                .unwrap_or_default())
        })
        .await
    }

    /// Replaces the version record.
    ///
    /// The tracking table is recreated on demand. A clean `None` leaves the
    /// table empty; a dirty `None` is kept so a failed first migration stays
    /// visible.
    pub async fn set_version(&self, version: Option<i64>, dirty: bool) -> Result<()> {
        self.table.ensure_table().await?;

        let qualified = self.table.qualified();
        bounded(self.deadline, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&format!("DELETE FROM {qualified}"))
                .execute(&mut *tx)
                .await?;
            if version.is_some() || dirty {
                sqlx::query(&format!(
                    "INSERT INTO {qualified} (version, dirty) VALUES (?, ?)"
                ))
                .bind(version)
                .bind(dirty)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(record = %VersionRecord::new(version, dirty), "Set version");
        Ok(())
    }

    /// Removes the tracking table and with it all recorded state.
    pub async fn drop_table(&self) -> Result<()> {
        self.table.drop_table().await
    }
}
