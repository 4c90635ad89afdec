//! Cross-process schema lock.
//!
//! The lock is a row in a dedicated lock table keyed by
//! `"{schema}.{migrations_table}"`. The primary key admits a single holder row,
//! so every process connected to the same database observes the same owner.
//! Each acquisition inserts a fresh holder token; release deletes the row only
//! when the token still matches, so a driver can never release a foreign lock.
//!
//! A holder that dies without releasing leaves its row behind. Recovery is an
//! explicit operator action through [`Locker::force_unlock`].

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::bounded;
use crate::error::{LockError, MigrateError, Result};
use crate::table::{create_table, qualified_name, table_exists};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Current owner of a schema lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Opaque token of the holding driver.
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

/// Acquires and releases the schema lock for one driver.
///
/// Not reentrant: calling [`Locker::lock`] while already holding the lock
/// fails with [`LockError::AlreadyHeld`].
#[derive(Debug)]
pub struct Locker {
    pool: SqlitePool,
    schema: String,
    table: String,
    key: String,
    timeout: Duration,
    deadline: Option<Duration>,
    token: Option<String>,
}

impl Locker {
    /// Creates a locker for the lock guarding `schema.migrations_table`.
    pub fn new(
        pool: SqlitePool,
        schema: &str,
        migrations_table: &str,
        timeout: Duration,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            table: format!("{migrations_table}_lock"),
            key: format!("{schema}.{migrations_table}"),
            timeout,
            deadline,
            token: None,
        }
    }

    /// Returns the lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns whether this locker currently holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    fn qualified(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }

    /// Ensures the lock table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        if table_exists(&self.pool, &self.schema, &self.table, self.deadline).await? {
            return Ok(());
        }
        let ddl = format!(
            "CREATE TABLE {} (lock_key TEXT PRIMARY KEY, holder TEXT NOT NULL, acquired_at TEXT NOT NULL)",
            self.qualified()
        );
        create_table(&self.pool, &self.qualified(), &ddl, self.deadline).await
    }

    /// Blocks until the lock is acquired or the lock timeout elapses.
    pub async fn lock(&mut self) -> Result<()> {
        if self.token.is_some() {
            return Err(LockError::AlreadyHeld(self.key.clone()).into());
        }

        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let acquired = match self.try_acquire(&token).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    // The insert may have committed before the call gave up
                    self.discard(&token).await;
                    return Err(e);
                }
            };
            if acquired {
                info!(key = %self.key, holder = %token, "Acquired lock");
                self.token = Some(token);
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(LockError::Timeout {
                    key: self.key.clone(),
                    timeout: self.timeout,
                }
                .into());
            }

            debug!(key = %self.key, "Lock held elsewhere, waiting");
            tokio::time::sleep(backoff.min(self.timeout - elapsed)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn try_acquire(&self, token: &str) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (lock_key, holder, acquired_at) VALUES (?, ?, ?)",
            self.qualified()
        );
        bounded(self.deadline, async {
            match sqlx::query(&sql)
                .bind(&self.key)
                .bind(token)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
            {
                Ok(_) => Ok(true),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
                Err(e) => Err(MigrateError::Database(e)),
            }
        })
        .await
    }

    async fn discard(&self, token: &str) {
        let sql = format!(
            "DELETE FROM {} WHERE lock_key = ? AND holder = ?",
            self.qualified()
        );
        let result = bounded(self.deadline, async {
            sqlx::query(&sql)
                .bind(&self.key)
                .bind(token)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await;
        if let Err(e) = result {
            warn!(key = %self.key, holder = %token, error = %e, "Failed to discard lock attempt");
        }
    }

    /// Releases the lock held by this locker.
    pub async fn unlock(&mut self) -> Result<()> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| LockError::NotHeld(self.key.clone()))?;

        let sql = format!(
            "DELETE FROM {} WHERE lock_key = ? AND holder = ?",
            self.qualified()
        );
        let removed = bounded(self.deadline, async {
            let result = sqlx::query(&sql)
                .bind(&self.key)
                .bind(&token)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        self.token = None;
        if removed == 0 {
            return Err(LockError::Lost(self.key.clone()).into());
        }

        info!(key = %self.key, holder = %token, "Released lock");
        Ok(())
    }

    /// Removes the lock row whoever holds it, returning the evicted holder.
    ///
    /// Recovery for a holder that exited without unlocking. Calling this while
    /// the holder is still alive breaks mutual exclusion.
    pub async fn force_unlock(&mut self) -> Result<Option<LockHolder>> {
        let sql = format!(
            "DELETE FROM {} WHERE lock_key = ? RETURNING holder, acquired_at",
            self.qualified()
        );
        let evicted = bounded(self.deadline, async {
            let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(&sql)
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.map(|(holder, acquired_at)| LockHolder {
                holder,
                acquired_at,
            }))
        })
        .await?;

        self.token = None;
        match &evicted {
            Some(previous) => warn!(key = %self.key, holder = %previous.holder, "Forced lock release"),
            None => debug!(key = %self.key, "Forced release found no lock"),
        }
        Ok(evicted)
    }

    /// Returns the current holder of the lock, from any process.
    pub async fn holder(&self) -> Result<Option<LockHolder>> {
        let sql = format!(
            "SELECT holder, acquired_at FROM {} WHERE lock_key = ?",
            self.qualified()
        );
        bounded(self.deadline, async {
            let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(&sql)
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.map(|(holder, acquired_at)| LockHolder {
                holder,
                acquired_at,
            }))
        })
        .await
    }
}
