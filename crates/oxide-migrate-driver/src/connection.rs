//! Connection management.
//!
//! Turns a DSN into a pooled SQLite connection, or adopts a pool supplied by
//! the caller. Driver parameters (`x-*`) are lifted into a [`Config`] and
//! stripped before the DSN reaches sqlx.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{MigrateError, Result};

/// Maximum connections for pools opened from a DSN.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// A DSN split into its scheme, the engine connection string and the
/// driver configuration.
#[derive(Debug, Clone)]
pub struct ParsedDsn {
    /// URL scheme, e.g. `sqlite`.
    pub scheme: String,
    /// DSN with driver parameters removed.
    pub connect_url: String,
    /// Configuration resolved from the driver parameters.
    pub config: Config,
}

/// Parses a DSN, applying its driver parameters on top of `base`.
pub fn parse_dsn(dsn: &str, base: Config) -> Result<ParsedDsn> {
    let mut url =
        Url::parse(dsn).map_err(|e| MigrateError::Connection(format!("malformed DSN: {e}")))?;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut config = base;
    let mut passthrough = Vec::new();
    for (name, value) in pairs {
        if !config.apply_param(&name, &value)? {
            passthrough.push((name, value));
        }
    }
    config.validate()?;

    if passthrough.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut()
            .clear()
            .extend_pairs(passthrough.iter());
    }

    Ok(ParsedDsn {
        scheme: url.scheme().to_string(),
        connect_url: url.to_string(),
        config,
    })
}

/// Opens a SQLite pool for a DSN that has already been stripped of driver
/// parameters.
pub async fn open_pool(connect_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(connect_url)
        .map_err(|e| MigrateError::Connection(format!("invalid connection string: {e}")))?;

    debug!(url = %connect_url, "Opening connection pool");
    SqlitePoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(|e| MigrateError::Connection(e.to_string()))
}

/// A pool together with whether the driver is responsible for closing it.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    pool: SqlitePool,
    owned: bool,
}

impl PoolHandle {
    /// Wraps a pool the driver opened itself.
    #[must_use]
    pub fn owned(pool: SqlitePool) -> Self {
        Self { pool, owned: true }
    }

    /// Wraps a pool supplied by the caller.
    #[must_use]
    pub fn shared(pool: SqlitePool) -> Self {
        Self { pool, owned: false }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns whether closing the driver closes the pool.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Closes the pool if the driver owns it.
    pub async fn close(&self) {
        if self.owned {
            self.pool.close().await;
        }
    }
}

/// Runs a database call under an optional deadline.
pub async fn bounded<T, F>(deadline: Option<Duration>, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| MigrateError::Timeout(limit))?,
        None => call.await,
    }
}
