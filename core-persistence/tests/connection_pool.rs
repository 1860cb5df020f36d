//! Integration tests for the shared connection pool
//!
//! These tests verify:
//! - One shared handle per file, reference counted across connections
//! - Concurrent connections to the same file
//! - Removal of unusable database files, at open and at query time
//! - Migrations through a logical connection

use core_persistence::{ConnectionPool, DatabaseConnection, Migrator, PersistenceError};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Barrier;

async fn select_one(connection: &DatabaseConnection) -> Result<i64, PersistenceError> {
    connection
        .read(|conn| {
            Box::pin(async move { sqlx::query_scalar("SELECT 1").fetch_one(conn).await })
        })
        .await
}

async fn create_bookmarks(connection: &DatabaseConnection) {
    connection
        .write(|conn| {
            Box::pin(async move {
                sqlx::query(
                    "CREATE TABLE bookmarks (sura INTEGER NOT NULL, aya INTEGER NOT NULL)",
                )
                .execute(conn)
                .await
                .map(|_| ())
            })
        })
        .await
        .unwrap();
}

async fn count_bookmarks(connection: &DatabaseConnection) -> i64 {
    connection
        .read(|conn| {
            Box::pin(async move {
                sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
                    .fetch_one(conn)
                    .await
            })
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_connections_share_one_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");

    let writer = DatabaseConnection::new(&path);
    let reader = DatabaseConnection::new(&path);

    create_bookmarks(&writer).await;
    writer
        .write(|conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO bookmarks (sura, aya) VALUES (?, ?)")
                    .bind(2_i64)
                    .bind(255_i64)
                    .execute(conn)
                    .await
                    .map(|_| ())
            })
        })
        .await
        .unwrap();

    assert_eq!(count_bookmarks(&reader).await, 1);
    assert_eq!(ConnectionPool::reference_count(&path), 2);
    assert!(ConnectionPool::is_open(&path));

    drop(writer);
    assert_eq!(ConnectionPool::reference_count(&path), 1);
    assert!(ConnectionPool::is_open(&path));

    drop(reader);
    assert_eq!(ConnectionPool::reference_count(&path), 0);
    assert!(!ConnectionPool::is_open(&path));
}

#[tokio::test]
async fn test_acquire_and_release_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counted.db");

    let first = ConnectionPool::acquire(&path).await.unwrap();
    let second = ConnectionPool::acquire(&path).await.unwrap();
    assert_eq!(ConnectionPool::reference_count(&path), 2);

    sqlx::query("SELECT 1").execute(&first).await.unwrap();
    sqlx::query("SELECT 1").execute(&second).await.unwrap();

    ConnectionPool::release(&path);
    assert_eq!(ConnectionPool::reference_count(&path), 1);
    ConnectionPool::release(&path);
    assert_eq!(ConnectionPool::reference_count(&path), 0);
    assert!(!ConnectionPool::is_open(&path));

    // Releasing more than was acquired is a no-op.
    ConnectionPool::release(&path);
    assert_eq!(ConnectionPool::reference_count(&path), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connections_to_one_file() {
    const TASKS: usize = 16;

    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("concurrent.db"));
    let opened = Arc::new(Barrier::new(TASKS + 1));
    let finish = Arc::new(Barrier::new(TASKS + 1));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let path = Arc::clone(&path);
            let opened = Arc::clone(&opened);
            let finish = Arc::clone(&finish);
            tokio::spawn(async move {
                let connection = DatabaseConnection::new(path.as_path());
                let one = select_one(&connection).await.unwrap();
                opened.wait().await;
                finish.wait().await;
                one
            })
        })
        .collect();

    opened.wait().await;
    assert_eq!(ConnectionPool::reference_count(&path), TASKS);
    assert!(ConnectionPool::is_open(&path));
    finish.wait().await;

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
    assert_eq!(ConnectionPool::reference_count(&path), 0);
    assert!(!ConnectionPool::is_open(&path));
}

#[tokio::test]
async fn test_unusable_file_is_deleted_and_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.db");
    std::fs::write(&path, b"this is not a sqlite database ".repeat(64)).unwrap();

    let connection = DatabaseConnection::new(&path);
    let result = select_one(&connection).await;

    assert!(matches!(result, Err(PersistenceError::BadFile { .. })));
    assert!(!path.exists());
    assert!(!connection.is_acquired());
    assert_eq!(ConnectionPool::reference_count(&path), 0);

    // The next open starts from a fresh file.
    let fresh = DatabaseConnection::new(&path);
    assert_eq!(select_one(&fresh).await.unwrap(), 1);
    assert!(path.exists());
    create_bookmarks(&fresh).await;
    assert_eq!(count_bookmarks(&fresh).await, 0);
}

const PAGE_SIZE: u64 = 4096;

/// Writes a bookmarks database the way a finished download leaves it: a valid
/// schema page followed by one table page.
async fn write_downloaded_database(path: &Path) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::query("PRAGMA page_size = 4096")
        .execute(&mut conn)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE bookmarks (sura INTEGER NOT NULL, aya INTEGER NOT NULL)")
        .execute(&mut conn)
        .await
        .unwrap();
    sqlx::query("INSERT INTO bookmarks (sura, aya) VALUES (2, 255)")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
}

/// Overwrites page `page` (1-based) with bytes that are not a b-tree page.
fn corrupt_page(path: &Path, page: u64) {
    let mut file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start((page - 1) * PAGE_SIZE)).unwrap();
    file.write_all(&[0xff; PAGE_SIZE as usize]).unwrap();
    file.sync_all().unwrap();
}

#[tokio::test]
async fn test_corruption_found_by_a_query_deletes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("downloaded.db");
    write_downloaded_database(&path).await;
    corrupt_page(&path, 2);

    let reader = DatabaseConnection::new(&path);
    let writer = DatabaseConnection::new(&path);

    // The schema page is intact, so the file opens.
    assert_eq!(select_one(&writer).await.unwrap(), 1);
    assert!(ConnectionPool::is_open(&path));

    let result = reader
        .read(|conn| {
            Box::pin(async move {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bookmarks")
                    .fetch_one(conn)
                    .await
            })
        })
        .await;

    assert!(matches!(result, Err(PersistenceError::BadFile { .. })));
    assert!(!path.exists());
    assert!(!ConnectionPool::is_open(&path));
    // Both connections keep their references across the discard.
    assert_eq!(ConnectionPool::reference_count(&path), 2);

    // The next operation on either connection starts from a fresh file.
    create_bookmarks(&writer).await;
    assert_eq!(count_bookmarks(&reader).await, 0);
    assert!(path.exists());
    assert!(ConnectionPool::is_open(&path));

    drop(reader);
    drop(writer);
    assert_eq!(ConnectionPool::reference_count(&path), 0);
}

#[tokio::test]
async fn test_query_failures_are_not_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("query.db");
    let connection = DatabaseConnection::new(&path);

    let result = connection
        .read(|conn| {
            Box::pin(async move {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM missing_table")
                    .fetch_one(conn)
                    .await
            })
        })
        .await;

    assert!(matches!(result, Err(PersistenceError::Query { .. })));
    assert!(path.exists());
}

fn write_migrations(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("1_create_bookmarks.sql"),
        "CREATE TABLE bookmarks (sura INTEGER NOT NULL, aya INTEGER NOT NULL);",
    )
    .unwrap();
    std::fs::write(
        dir.join("2_bookmark_notes.sql"),
        "ALTER TABLE bookmarks ADD COLUMN note TEXT;",
    )
    .unwrap();
}

#[tokio::test]
async fn test_migrations_apply_once() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    write_migrations(&migrations);
    let migrator = Migrator::new(migrations).await.unwrap();

    let connection = DatabaseConnection::new(dir.path().join("migrated.db"));
    connection.migrate(&migrator).await.unwrap();
    connection.migrate(&migrator).await.unwrap();

    connection
        .write(|conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO bookmarks (sura, aya, note) VALUES (1, 1, 'opening')")
                    .execute(conn)
                    .await
                    .map(|_| ())
            })
        })
        .await
        .unwrap();
    assert_eq!(count_bookmarks(&connection).await, 1);
}
