//! oxide-migrate-driver CLI
//!
//! Operator tool for inspecting and repairing the migration state of a
//! database, and for applying a single migration file under the schema lock.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_migrate_driver::prelude::*;

/// Lock-guarded SQL migration driver.
#[derive(Parser)]
#[command(name = "oxide-migrate-driver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL, e.g. `sqlite://db.sqlite3?mode=rwc&x-multi-statement=true`.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite://db.sqlite3?mode=rwc")]
    database: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current version and dirty flag.
    Version {
        /// Print the record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Apply one migration file as the given version.
    Apply {
        /// Version recorded for this migration.
        version: i64,

        /// Path to the migration script.
        file: PathBuf,
    },

    /// Set the version and clear the dirty flag without running anything.
    Force {
        /// Version to record.
        version: i64,
    },

    /// Remove the tracking table and all recorded state.
    Drop,

    /// Show whether any process holds the schema lock.
    LockStatus,

    /// Remove a schema lock left behind by a process that exited without
    /// releasing it.
    ForceUnlock,
}

/// Applies one migration under the schema lock, refusing to continue from a
/// dirty state.
async fn apply(driver: &mut dyn MigrationDriver, version: i64, script: &[u8]) -> Result<()> {
    driver.lock().await?;
    let outcome = apply_locked(&*driver, version, script).await;
    let released = driver.unlock().await;

    match (outcome, released) {
        (Ok(()), released) => released,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(unlock)) => Err(MigrateError::Multiple(vec![e, unlock])),
    }
}

async fn apply_locked(driver: &dyn MigrationDriver, version: i64, script: &[u8]) -> Result<()> {
    let current = driver.version().await?;
    if current.dirty {
        return Err(MigrateError::DirtyState(current.version));
    }

    driver.set_version(Some(version), true).await?;
    driver.run(script).await?;
    driver.set_version(Some(version), false).await?;

    info!(version, "Migration applied successfully");
    Ok(())
}

async fn execute(driver: &mut dyn MigrationDriver, command: Commands) -> Result<()> {
    match command {
        Commands::Version { json } => {
            let record = driver.version().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{record}");
            }
        }

        Commands::Apply { version, file } => {
            let script = std::fs::read(&file)?;
            info!(version, file = %file.display(), "Applying migration");
            apply(driver, version, &script).await?;
        }

        Commands::Force { version } => {
            driver.set_version(Some(version), false).await?;
            info!(version, "Forced version");
        }

        Commands::Drop => {
            driver.drop_table().await?;
            info!("Tracking table dropped.");
        }

        Commands::LockStatus => match driver.lock_holder().await? {
            Some(holder) => println!(
                "locked by {} since {}",
                holder.holder,
                holder.acquired_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("unlocked"),
        },

        Commands::ForceUnlock => match driver.force_unlock().await? {
            Some(holder) => println!(
                "removed lock held by {} since {}",
                holder.holder,
                holder.acquired_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("unlocked"),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let factory = DriverFactory::with_defaults();
    let mut driver = factory.open(&cli.database).await?;

    let outcome = execute(driver.as_mut(), cli.command).await;
    let closed = driver.close().await;
    outcome?;
    closed?;
    Ok(())
}
