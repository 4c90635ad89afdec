//! SQLite migration driver.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use super::MigrationDriver;
use crate::config::Config;
use crate::connection::{PoolHandle, open_pool, parse_dsn};
use crate::error::{MigrateError, Result};
use crate::lock::{LockHolder, Locker};
use crate::statement::StatementExecutor;
use crate::table::MigrationsTable;
use crate::version::{VersionRecord, VersionStore};

/// DSN scheme handled by this driver.
pub const SCHEME: &str = "sqlite";

/// Migration driver over a SQLite connection pool.
#[derive(Debug)]
pub struct SqliteDriver {
    pool: PoolHandle,
    config: Config,
    versions: VersionStore,
    locker: Locker,
    executor: StatementExecutor,
}

impl SqliteDriver {
    /// Opens a driver from a DSN such as `sqlite://app.db?mode=rwc`.
    ///
    /// The driver owns the pool and closes it on [`MigrationDriver::close`].
    pub async fn open(dsn: &str) -> Result<Self> {
        Self::open_with_config(dsn, Config::default()).await
    }

    /// Opens a driver from a DSN, using `config` as the base that DSN
    /// parameters override.
    pub async fn open_with_config(dsn: &str, config: Config) -> Result<Self> {
        let parsed = parse_dsn(dsn, config)?;
        if parsed.scheme != SCHEME {
            return Err(MigrateError::Connection(format!(
                "expected scheme '{SCHEME}', got '{}'",
                parsed.scheme
            )));
        }

        let pool = open_pool(&parsed.connect_url).await?;
        match Self::init(PoolHandle::owned(pool.clone()), parsed.config).await {
            Ok(driver) => Ok(driver),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    /// Wraps a pool supplied by the caller.
    ///
    /// The pool is shared: closing the driver leaves it open. Safe to call
    /// concurrently from many tasks on the same pool.
    pub async fn wrap(pool: SqlitePool, config: Config) -> Result<Self> {
        Self::init(PoolHandle::shared(pool), config).await
    }

    async fn init(handle: PoolHandle, config: Config) -> Result<Self> {
        config.validate()?;

        let pool = handle.pool().clone();
        let deadline = config.statement_timeout;
        let schema = config.schema().to_string();

        let table = MigrationsTable::new(
            pool.clone(),
            schema.as_str(),
            config.migrations_table.as_str(),
            deadline,
        );
        table.ensure_table().await?;

        let locker = Locker::new(
            pool.clone(),
            &schema,
            &config.migrations_table,
            config.lock_timeout,
            deadline,
        );
        locker.ensure_table().await?;

        let mut executor = StatementExecutor::new(pool.clone(), deadline);
        if config.multi_statement_enabled {
            executor = executor.multi_statement(config.multi_statement_separator.as_str());
        }

        Ok(Self {
            versions: VersionStore::new(pool, table, deadline),
            pool: handle,
            config,
            locker,
            executor,
        })
    }

    /// Returns the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        self.pool.pool()
    }

    /// Returns whether this driver currently holds the schema lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locker.is_held()
    }
}

#[async_trait]
impl MigrationDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        SCHEME
    }

    async fn lock(&mut self) -> Result<()> {
        self.locker.lock().await
    }

    async fn unlock(&mut self) -> Result<()> {
        self.locker.unlock().await
    }

    async fn run(&self, script: &[u8]) -> Result<()> {
        self.executor.run(script).await
    }

    async fn version(&self) -> Result<VersionRecord> {
        self.versions.version().await
    }

    async fn set_version(&self, version: Option<i64>, dirty: bool) -> Result<()> {
        self.versions.set_version(version, dirty).await
    }

    async fn drop_table(&self) -> Result<()> {
        self.versions.drop_table().await
    }

    async fn lock_holder(&self) -> Result<Option<LockHolder>> {
        self.locker.holder().await
    }

    async fn force_unlock(&mut self) -> Result<Option<LockHolder>> {
        self.locker.force_unlock().await
    }

    async fn close(&mut self) -> Result<()> {
        let released = if self.locker.is_held() {
            warn!(key = %self.locker.key(), "Releasing lock still held at close");
            self.locker.unlock().await
        } else {
            Ok(())
        };

        self.pool.close().await;
        info!(owned = self.pool.is_owned(), "Closed driver");
        released
    }
}
