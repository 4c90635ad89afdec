//! Example: Blog Application Migrations
//!
//! This example plays the orchestrator: it applies a short list of SQL
//! migrations through the driver, shows a failing migration leaving the schema
//! dirty, and repairs it by forcing the version.
//!
//! Run with: cargo run --example blog_migrations -p oxide-migrate-driver

use oxide_migrate_driver::prelude::*;

// =============================================================================
// Migration Scripts
// =============================================================================

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username VARCHAR(100) NOT NULL UNIQUE,
            email VARCHAR(255) NOT NULL
        );
        CREATE INDEX idx_users_email ON users (email);",
    ),
    (
        2,
        "CREATE TABLE posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id BIGINT NOT NULL REFERENCES users (id),
            title VARCHAR(200) NOT NULL,
            body TEXT NOT NULL
        );",
    ),
    (
        3,
        "DROP TABLE IF EXISTS legacy_comments;
        DROP INDEX IF EXISTS idx_legacy_comments_post;",
    ),
];

// This one fails on its second statement
const BROKEN_MIGRATION: (i64, &str) = (
    4,
    "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    ALTER TABLE missing_table ADD COLUMN tag_id BIGINT;",
);

async fn apply(driver: &mut dyn MigrationDriver, version: i64, script: &str) -> Result<()> {
    driver.lock().await?;

    let result = async {
        let current = driver.version().await?;
        if current.dirty {
            return Err(MigrateError::DirtyState(current.version));
        }
        driver.set_version(Some(version), true).await?;
        driver.run(script.as_bytes()).await?;
        driver.set_version(Some(version), false).await
    }
    .await;

    driver.unlock().await?;
    result
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!(" oxide-migrate-driver: Blog Migrations Example");
    println!("{}", "=".repeat(70));
    println!();

    // Create in-memory SQLite database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;

    println!("[1] Wrapping pool (creates schema_migrations)...");
    let config = Config::new().with_multi_statement(";");
    let mut driver = SqliteDriver::wrap(pool, config).await?;
    println!("    Current version: {}\n", driver.version().await?);

    println!("[2] Applying migrations...\n");
    for (version, script) in MIGRATIONS {
        print!("    Applying {version}...");
        apply(&mut driver, *version, script).await?;
        println!(" OK");
    }
    println!("\n    Current version: {}\n", driver.version().await?);

    println!("[3] Applying a broken migration...\n");
    let (version, script) = BROKEN_MIGRATION;
    match apply(&mut driver, version, script).await {
        Ok(()) => println!("    Unexpectedly succeeded"),
        Err(e) => println!("    Failed: {e}"),
    }
    println!("    Current version: {}\n", driver.version().await?);

    println!("[4] Retrying refuses to touch a dirty schema...\n");
    if let Err(e) = apply(&mut driver, version, script).await {
        println!("    {e}\n");
    }

    println!("[5] Forcing version 3 after manual cleanup...\n");
    driver.run(b"DROP TABLE IF EXISTS tags").await?;
    driver.set_version(Some(3), false).await?;
    println!("    Current version: {}\n", driver.version().await?);

    driver.close().await?;

    println!("{}", "=".repeat(70));
    println!(" Example completed successfully!");
    println!("{}", "=".repeat(70));

    Ok(())
}
