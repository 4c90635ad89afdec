//! Lock-guarded, dirty-tracking SQL migration driver.
//!
//! `oxide-migrate-driver` is the database side of a migration tool. An
//! orchestrator decides which migration scripts to run and in which order;
//! this crate applies them safely:
//! - A cross-process schema lock keeps two migration runs from interleaving
//! - A single-row tracking table records the current version and a dirty flag,
//!   so a migration that failed halfway is detected instead of re-applied
//! - Scripts run as one unit or split on a separator, with the failing
//!   statement identified by its position
//!
//! # Architecture
//!
//! - **Connection** - Parses DSNs and owns or borrows the connection pool
//! - **Table** - Idempotent creation of the tracking table
//! - **Lock** - Schema lock backed by a lock table visible to every process
//! - **Statement** - Splits and executes migration scripts
//! - **Version** - Reads and replaces the version record
//! - **Driver** - The [`MigrationDriver`] facade and the [`DriverFactory`]
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_migrate_driver::prelude::*;
//!
//! let factory = DriverFactory::with_defaults();
//! let mut driver = factory
//!     .open("sqlite://app.db?mode=rwc&x-multi-statement=true")
//!     .await?;
//!
//! driver.lock().await?;
//! driver.set_version(Some(1), true).await?;
//! driver.run(b"CREATE TABLE users (id INTEGER PRIMARY KEY); CREATE INDEX users_id ON users (id);").await?;
//! driver.set_version(Some(1), false).await?;
//! driver.unlock().await?;
//! driver.close().await?;
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod lock;
pub mod statement;
pub mod table;
pub mod version;

pub use driver::{DriverFactory, MigrationDriver};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::driver::{DriverFactory, MigrationDriver, SqliteDriver};
    pub use crate::error::{LockError, MigrateError, Result};
    pub use crate::lock::LockHolder;
    pub use crate::version::VersionRecord;
}
