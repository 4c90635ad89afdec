//! Conformance tests for migration drivers.
//!
//! The generic sequence exercises a driver only through the
//! `MigrationDriver` trait; the remaining tests cover SQLite behaviour that
//! needs a real database file shared by several pools.

mod common;

use std::time::{Duration, Instant};

use oxide_migrate_driver::prelude::*;

use common::{count_tables, dsn, file_pool, temp_database};

// =============================================================================
// Generic driver sequence
// =============================================================================

async fn check_nil_version(driver: &dyn MigrationDriver) {
    let record = driver.version().await.unwrap();
    assert_eq!(record, VersionRecord::default());
}

async fn check_lock_and_unlock(driver: &mut dyn MigrationDriver) {
    driver.lock().await.unwrap();

    // Nested locking fails instead of deadlocking
    assert!(matches!(
        driver.lock().await,
        Err(MigrateError::Lock(LockError::AlreadyHeld(_)))
    ));

    driver.unlock().await.unwrap();
    assert!(driver.lock_holder().await.unwrap().is_none());

    for _ in 0..3 {
        driver.lock().await.unwrap();
        assert!(driver.lock_holder().await.unwrap().is_some());
        driver.unlock().await.unwrap();
        assert!(driver.lock_holder().await.unwrap().is_none());
    }

    assert!(driver.unlock().await.is_err());
}

async fn check_run(driver: &dyn MigrationDriver, migration: &[u8]) {
    driver.run(migration).await.unwrap();
}

async fn check_set_version(driver: &dyn MigrationDriver) {
    let cases = [
        (Some(1), true),
        (Some(1), false),
        (None, true),
        (Some(2), true),
        (Some(2), false),
        (None, false),
    ];
    for (version, dirty) in cases {
        driver.set_version(version, dirty).await.unwrap();
        let expected = if version.is_none() && !dirty {
            VersionRecord::default()
        } else {
            VersionRecord::new(version, dirty)
        };
        assert_eq!(driver.version().await.unwrap(), expected);
    }
}

async fn check_drop(driver: &dyn MigrationDriver) {
    driver.set_version(Some(9), false).await.unwrap();
    driver.drop_table().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), VersionRecord::default());

    driver.set_version(Some(10), false).await.unwrap();
    assert_eq!(
        driver.version().await.unwrap(),
        VersionRecord::new(Some(10), false)
    );
}

async fn conformance(driver: &mut dyn MigrationDriver, migration: &[u8]) {
    check_nil_version(&*driver).await;
    check_lock_and_unlock(driver).await;
    check_run(&*driver, migration).await;
    check_set_version(&*driver).await;
    check_drop(&*driver).await;
}

#[tokio::test]
async fn test_conformance_via_factory() {
    let (_dir, path) = temp_database();
    let factory = DriverFactory::with_defaults();
    let mut driver = factory.open(&dsn(&path, "")).await.unwrap();

    conformance(driver.as_mut(), b"CREATE TABLE hello (id INTEGER)").await;
    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_conformance_multi_statement() {
    let (_dir, path) = temp_database();
    let mut driver = SqliteDriver::open(&dsn(
        &path,
        "x-migrations-table=schema_migrations_multi&x-multi-statement=true",
    ))
    .await
    .unwrap();

    conformance(
        &mut driver,
        b"CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER);\n",
    )
    .await;

    let pool = file_pool(&path, 1).await;
    assert_eq!(count_tables(&pool, "schema_migrations_multi").await, 1);
    assert_eq!(count_tables(&pool, "a").await, 1);
    assert_eq!(count_tables(&pool, "b").await, 1);
    driver.close().await.unwrap();
}

// =============================================================================
// Opening and closing
// =============================================================================

#[tokio::test]
async fn test_open_applies_dsn_parameters() {
    let (_dir, path) = temp_database();
    let mut driver = SqliteDriver::open(&dsn(
        &path,
        "x-migrations-table=versions&x-multi-statement=true&x-multi-statement-separator=---&x-lock-timeout=250",
    ))
    .await
    .unwrap();

    let config = driver.config();
    assert_eq!(config.migrations_table, "versions");
    assert!(config.multi_statement_enabled);
    assert_eq!(config.multi_statement_separator, "---");
    assert_eq!(config.lock_timeout, Duration::from_millis(250));
    assert_eq!(config.schema(), "main");

    let pool = file_pool(&path, 1).await;
    assert_eq!(count_tables(&pool, "versions").await, 1);

    driver.close().await.unwrap();
    assert!(driver.pool().is_closed());
}

#[tokio::test]
async fn test_open_malformed_dsn() {
    let result = SqliteDriver::open("not a dsn").await;
    assert!(matches!(result, Err(MigrateError::Connection(_))));
}

#[tokio::test]
async fn test_open_rejects_empty_separator() {
    let (_dir, path) = temp_database();
    let result = SqliteDriver::open(&dsn(
        &path,
        "x-multi-statement=true&x-multi-statement-separator=",
    ))
    .await;
    assert!(matches!(result, Err(MigrateError::Config(_))));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrap_concurrent() {
    // The number of concurrent initializations sharing one pool
    const CONCURRENCY: usize = 30;

    let (_dir, path) = temp_database();
    let pool = file_pool(&path, CONCURRENCY as u32).await;

    let handles: Vec<_> = (0..CONCURRENCY)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { SqliteDriver::wrap(pool, Config::default()).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await.unwrap() {
            panic!("initialization {i} failed: {e}");
        }
    }

    assert_eq!(count_tables(&pool, "schema_migrations").await, 1);
    assert_eq!(count_tables(&pool, "schema_migrations_lock").await, 1);
    assert!(!pool.is_closed());
}

#[tokio::test]
async fn test_lock_excludes_other_process() {
    let (_dir, path) = temp_database();
    let config = Config::new().with_lock_timeout(Duration::from_millis(200));

    let mut first = SqliteDriver::wrap(file_pool(&path, 2).await, config.clone())
        .await
        .unwrap();
    let mut second = SqliteDriver::wrap(file_pool(&path, 2).await, config)
        .await
        .unwrap();

    first.lock().await.unwrap();
    assert!(matches!(
        second.lock().await,
        Err(MigrateError::Lock(LockError::Timeout { .. }))
    ));
    assert!(second.lock_holder().await.unwrap().is_some());

    // The waiting driver cannot release a lock it never took
    assert!(matches!(
        second.unlock().await,
        Err(MigrateError::Lock(LockError::NotHeld(_)))
    ));

    first.unlock().await.unwrap();
    second.lock().await.unwrap();
    second.unlock().await.unwrap();

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_force_unlock_after_crashed_holder() {
    let (_dir, path) = temp_database();

    // The holder's process goes away without unlocking or closing the driver
    let crashed_pool = file_pool(&path, 2).await;
    let mut crashed = SqliteDriver::wrap(crashed_pool.clone(), Config::default())
        .await
        .unwrap();
    crashed.lock().await.unwrap();
    let abandoned = crashed.lock_holder().await.unwrap().unwrap();
    drop(crashed);
    crashed_pool.close().await;

    let config = Config::new().with_lock_timeout(Duration::from_millis(300));
    let mut survivor = SqliteDriver::wrap(file_pool(&path, 2).await, config)
        .await
        .unwrap();
    assert!(matches!(
        survivor.lock().await,
        Err(MigrateError::Lock(LockError::Timeout { .. }))
    ));

    assert_eq!(survivor.force_unlock().await.unwrap(), Some(abandoned));
    survivor.lock().await.unwrap();
    survivor.unlock().await.unwrap();
    survivor.close().await.unwrap();
}

// =============================================================================
// Per-call deadline
// =============================================================================

#[tokio::test]
async fn test_statement_timeout_bounds_stalled_run() {
    let (_dir, path) = temp_database();
    let mut driver = SqliteDriver::open(&dsn(&path, "x-statement-timeout=200"))
        .await
        .unwrap();
    assert_eq!(
        driver.config().statement_timeout,
        Some(Duration::from_millis(200))
    );

    // Another process holds the write lock on the file
    let other = file_pool(&path, 1).await;
    let mut tx = other.begin().await.unwrap();
    sqlx::query("INSERT INTO schema_migrations (version, dirty) VALUES (1, 0)")
        .execute(&mut *tx)
        .await
        .unwrap();

    let result = driver.run(b"CREATE TABLE stalled (id INTEGER)").await;
    assert!(matches!(result, Err(MigrateError::Timeout(d)) if d == Duration::from_millis(200)));

    tx.rollback().await.unwrap();
    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_statement_timeout_bounds_stalled_lock() {
    let (_dir, path) = temp_database();
    let config = Config::new()
        .with_lock_timeout(Duration::from_secs(30))
        .with_statement_timeout(Duration::from_millis(200));
    let mut driver = SqliteDriver::wrap(file_pool(&path, 2).await, config)
        .await
        .unwrap();

    let other = file_pool(&path, 1).await;
    let mut tx = other.begin().await.unwrap();
    sqlx::query("INSERT INTO schema_migrations (version, dirty) VALUES (1, 0)")
        .execute(&mut *tx)
        .await
        .unwrap();

    // The deadline fires long before the lock timeout would
    let started = Instant::now();
    let result = driver.lock().await;
    assert!(matches!(result, Err(MigrateError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!driver.is_locked());

    tx.rollback().await.unwrap();
}

// =============================================================================
// Script execution
// =============================================================================

#[tokio::test]
async fn test_failed_fragment_leaves_dirty() {
    let (_dir, path) = temp_database();
    let mut driver = SqliteDriver::open(&dsn(&path, "x-multi-statement=true"))
        .await
        .unwrap();

    driver.lock().await.unwrap();
    driver.set_version(Some(1), true).await.unwrap();
    let err = driver
        .run(b"CREATE TABLE stmt_a (id INTEGER);CREATE TABLE stmt_a (id INTEGER)")
        .await
        .unwrap_err();
    assert_eq!(err.statement_index(), Some(1));
    driver.unlock().await.unwrap();

    // A fresh driver sees the failure
    let observer = SqliteDriver::open(&dsn(&path, "")).await.unwrap();
    assert_eq!(
        observer.version().await.unwrap(),
        VersionRecord::new(Some(1), true)
    );
}

#[tokio::test]
async fn test_guarded_blocks_on_absent_objects() {
    let (_dir, path) = temp_database();
    let driver = SqliteDriver::open(&dsn(&path, "x-multi-statement=true"))
        .await
        .unwrap();

    let script = b"DROP TABLE IF EXISTS legacy_users;\nDROP VIEW IF EXISTS legacy_report;\n";
    driver.run(script).await.unwrap();
    // Still fine once the objects are long gone
    driver.run(script).await.unwrap();
}

#[tokio::test]
async fn test_version_replace_semantics() {
    let (_dir, path) = temp_database();
    let driver = SqliteDriver::open(&dsn(&path, "")).await.unwrap();

    driver.set_version(Some(5), true).await.unwrap();
    driver.set_version(Some(5), false).await.unwrap();

    let rows: Vec<(Option<i64>, bool)> =
        sqlx::query_as("SELECT version, dirty FROM schema_migrations")
            .fetch_all(driver.pool())
            .await
            .unwrap();
    assert_eq!(rows, vec![(Some(5), false)]);
}

#[tokio::test]
async fn test_drop_removes_table() {
    let (_dir, path) = temp_database();
    let driver = SqliteDriver::open(&dsn(&path, "")).await.unwrap();

    driver.set_version(Some(3), false).await.unwrap();
    driver.drop_table().await.unwrap();

    assert_eq!(count_tables(driver.pool(), "schema_migrations").await, 0);
    assert_eq!(driver.version().await.unwrap(), VersionRecord::default());
}
