#![allow(dead_code)]

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;

/// A database file that lives as long as the returned directory.
pub fn temp_database() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("migrations.db");
    (dir, path)
}

/// DSN for a database file, with extra query parameters appended.
pub fn dsn(path: &Path, params: &str) -> String {
    if params.is_empty() {
        format!("sqlite://{}?mode=rwc", path.display())
    } else {
        format!("sqlite://{}?mode=rwc&{params}", path.display())
    }
}

/// A separate pool on the same database file, standing in for another process.
pub async fn file_pool(path: &Path, max_connections: u32) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .expect("Failed to open SQLite file pool")
}

pub async fn count_tables(pool: &SqlitePool, name: &str) -> i64 {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("Failed to query sqlite_master");
    row.0
}
