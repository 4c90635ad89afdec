//! Migration driver interface.
//!
//! A [`MigrationDriver`] is the whole surface a migration orchestrator needs:
//! locking, script execution and version bookkeeping. Drivers are created
//! through a [`DriverFactory`] that the caller builds explicitly, mapping DSN
//! schemes to constructors.

mod sqlite;

pub use sqlite::{SCHEME as SQLITE_SCHEME, SqliteDriver};

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use url::Url;

use crate::error::{MigrateError, Result};
use crate::lock::LockHolder;
use crate::version::VersionRecord;

/// Operations a migration orchestrator calls on a database.
#[async_trait]
pub trait MigrationDriver: Send + Sync {
    /// Returns the driver name.
    fn name(&self) -> &'static str;

    /// Acquires the schema lock, waiting up to the configured lock timeout.
    ///
    /// Fails immediately if this driver already holds the lock.
    async fn lock(&mut self) -> Result<()>;

    /// Releases the schema lock held by this driver.
    async fn unlock(&mut self) -> Result<()>;

    /// Executes a migration script.
    async fn run(&self, script: &[u8]) -> Result<()>;

    /// Returns the current version record.
    async fn version(&self) -> Result<VersionRecord>;

    /// Replaces the version record.
    async fn set_version(&self, version: Option<i64>, dirty: bool) -> Result<()>;

    /// Removes the tracking table and all recorded state.
    async fn drop_table(&self) -> Result<()>;

    /// Returns the current holder of the schema lock, if any process holds it.
    async fn lock_holder(&self) -> Result<Option<LockHolder>>;

    /// Removes the schema lock regardless of its holder and returns the
    /// evicted holder.
    ///
    /// Only for recovering from a holder that died without unlocking.
    async fn force_unlock(&mut self) -> Result<Option<LockHolder>>;

    /// Releases any held lock and closes the pool if the driver opened it.
    async fn close(&mut self) -> Result<()>;
}

/// Constructor registered for a DSN scheme.
pub type OpenFn = fn(String) -> BoxFuture<'static, Result<Box<dyn MigrationDriver>>>;

/// Maps DSN schemes to driver constructors.
#[derive(Default)]
pub struct DriverFactory {
    openers: BTreeMap<String, OpenFn>,
}

impl DriverFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with the bundled drivers registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(SQLITE_SCHEME, open_sqlite);
        factory
    }

    /// Registers a constructor for a scheme, replacing any previous one.
    pub fn register(&mut self, scheme: impl Into<String>, open: OpenFn) -> &mut Self {
        self.openers.insert(scheme.into(), open);
        self
    }

    /// Returns the registered schemes.
    #[must_use]
    pub fn schemes(&self) -> Vec<&str> {
        self.openers.keys().map(String::as_str).collect()
    }

    /// Opens a driver for a DSN, dispatching on its scheme.
    pub async fn open(&self, dsn: &str) -> Result<Box<dyn MigrationDriver>> {
        let scheme = Url::parse(dsn)
            .map_err(|e| MigrateError::Connection(format!("malformed DSN: {e}")))?
            .scheme()
            .to_string();

        let open = self.openers.get(&scheme).ok_or_else(|| {
            MigrateError::Connection(format!("no driver registered for scheme '{scheme}'"))
        })?;
        open(dsn.to_string()).await
    }
}

fn open_sqlite(dsn: String) -> BoxFuture<'static, Result<Box<dyn MigrationDriver>>> {
    Box::pin(async move {
        let driver = SqliteDriver::open(&dsn).await?;
        Ok(Box::new(driver) as Box<dyn MigrationDriver>)
    })
}
