//! # Database Connection Pool Module
//!
//! Shares one SQLite handle per database file across any number of logical
//! connections.
//!
//! ## Overview
//!
//! [`ConnectionPool`] is a process-wide table from file path to an open
//! [`SqlitePool`] plus a reference count. [`DatabaseConnection`] is the
//! logical connection callers hold: it acquires its reference on first use and
//! releases it when dropped, so a file stays open exactly as long as somebody
//! holds a connection that has touched it.
//!
//! ## Opening
//!
//! - **Directories**: missing parent directories are created
//! - **WAL Mode**: enabled so readers do not block the writer
//! - **Busy Timeout**: 5 seconds per attempt, 3 attempts on `SQLITE_BUSY`/`SQLITE_LOCKED`
//! - **Bad Files**: a file that is corrupt, not a database or cannot be
//!   opened is deleted and the open fails with [`PersistenceError::BadFile`];
//!   the next open starts from a fresh file
//!
//! Corruption that only shows once a page is read is handled the same way: a
//! bad-file error from [`DatabaseConnection::read`], [`write`](DatabaseConnection::write)
//! or [`migrate`](DatabaseConnection::migrate) closes the shared handle and
//! deletes the file. Connections holding a reference keep it and reopen a
//! fresh file on their next operation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_persistence::DatabaseConnection;
//!
//! let connection = DatabaseConnection::new(dir.join("bookmarks.db"));
//! let count: i64 = connection
//!     .read(|conn| {
//!         Box::pin(async move {
//!             sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
//!                 .fetch_one(conn)
//!                 .await
//!         })
//!     })
//!     .await?;
//! ```

use crate::error::{is_bad_file, is_busy, PersistenceError, Result};
use core_runtime::logging::strip_path;
use futures::future::BoxFuture;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Wait for a lock held by another connection before giving up on an attempt.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open attempts while the file is locked by another process.
pub const OPEN_ATTEMPTS: u32 = 3;

const MAX_CONNECTIONS: u32 = 4;

/// Files SQLite keeps next to the database in WAL mode.
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

type PoolCell = Arc<OnceCell<SqlitePool>>;

struct PoolEntry {
    /// Replaced by a fresh cell when the file behind it is discarded.
    pool: PoolCell,
    references: usize,
}

static POOLS: LazyLock<Mutex<HashMap<PathBuf, PoolEntry>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Serializes discards so a file is never deleted under a newer handle.
static DISCARDS: LazyLock<tokio::sync::Mutex<()>> =
    LazyLock::new(|| tokio::sync::Mutex::new(()));

fn pools() -> MutexGuard<'static, HashMap<PathBuf, PoolEntry>> {
    POOLS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide registry of open database handles.
///
/// Files are keyed by the path exactly as given; callers should use one
/// spelling per file.
pub struct ConnectionPool;

impl ConnectionPool {
    /// Returns the handle for `path`, opening it if this is the first reference.
    ///
    /// Every successful call must be paired with one [`release`](Self::release).
    /// A failed call holds no reference.
    pub async fn acquire(path: &Path) -> Result<SqlitePool> {
        let cell = {
            let mut pools = pools();
            let entry = pools.entry(path.to_path_buf()).or_insert_with(|| PoolEntry {
                pool: Arc::new(OnceCell::new()),
                references: 0,
            });
            entry.references += 1;
            Arc::clone(&entry.pool)
        };

        match cell.get_or_try_init(|| open(path)).await {
            Ok(pool) => Ok(pool.clone()),
            Err(e) => {
                Self::release(path);
                Err(e)
            }
        }
    }

    /// Drops one reference to `path`; the last one closes the handle.
    pub fn release(path: &Path) {
        let mut pools = pools();
        let Some(entry) = pools.get_mut(path) else {
            warn!(
                file = strip_path(&path.to_string_lossy()),
                "Released a database that is not open"
            );
            return;
        };

        entry.references = entry.references.saturating_sub(1);
        if entry.references > 0 {
            return;
        }

        let Some(entry) = pools.remove(path) else {
            return;
        };
        drop(pools);

        if let Some(pool) = entry.pool.get().cloned() {
            debug!(file = strip_path(&path.to_string_lossy()), "Closing database");
            // Closing waits for in-flight connections to come back; without a
            // runtime the pool is torn down when its last clone drops.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { pool.close().await });
            }
        }
    }

    /// Outstanding references to `path`; zero when it is not open.
    pub fn reference_count(path: &Path) -> usize {
        pools().get(path).map(|entry| entry.references).unwrap_or(0)
    }

    /// `true` while a handle for `path` is open.
    pub fn is_open(path: &Path) -> bool {
        pools()
            .get(path)
            .map(|entry| entry.pool.initialized())
            .unwrap_or(false)
    }

    /// The current handle for `path`, reopening it if it was discarded.
    ///
    /// The caller must hold a reference from [`acquire`](Self::acquire).
    async fn current(path: &Path) -> Result<(PoolCell, SqlitePool)> {
        let cell = pools()
            .get(path)
            .map(|entry| Arc::clone(&entry.pool))
            .ok_or_else(|| PersistenceError::Query {
                path: path.to_path_buf(),
                source: sqlx::Error::PoolClosed,
            })?;
        let pool = cell.get_or_try_init(|| open(path)).await?.clone();
        Ok((cell, pool))
    }

    /// Closes the handle in `stale` and deletes the file behind it, unless
    /// `path` has already moved on to a newer handle.
    ///
    /// References are kept; the next [`current`](Self::current) opens a fresh
    /// file.
    async fn discard(path: &Path, stale: &PoolCell) {
        let _serial = DISCARDS.lock().await;
        let is_current = |pools: &HashMap<PathBuf, PoolEntry>| {
            pools
                .get(path)
                .is_some_and(|entry| Arc::ptr_eq(&entry.pool, stale))
        };
        if !is_current(&pools()) {
            return;
        }

        // Waits for connections checked out by other callers to come back.
        if let Some(pool) = stale.get() {
            pool.close().await;
        }
        warn!(
            file = strip_path(&path.to_string_lossy()),
            "Database file is unusable, deleting it"
        );
        remove_database_files(path).await;

        let mut pools = pools();
        if is_current(&pools) {
            if let Some(entry) = pools.get_mut(path) {
                entry.pool = Arc::new(OnceCell::new());
            }
        }
    }
}

async fn open(path: &Path) -> Result<SqlitePool> {
    open_with(path, BUSY_TIMEOUT).await
}

#[instrument(skip_all, fields(file = strip_path(&path.to_string_lossy())))]
async fn open_with(path: &Path, busy_timeout: Duration) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);

    let mut attempt = 1;
    loop {
        let result = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options.clone())
            .await;

        match result {
            Ok(pool) => {
                info!(attempt, "Opened database");
                return Ok(pool);
            }
            Err(e) if is_busy(&e) && attempt < OPEN_ATTEMPTS => {
                warn!(attempt, error = %e, "Database is locked, retrying open");
                attempt += 1;
            }
            Err(e) if is_bad_file(&e) => {
                warn!(error = %e, "Database file is unusable, deleting it");
                remove_database_files(path).await;
                return Err(PersistenceError::BadFile {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                warn!(attempt, error = %e, "Failed to open database");
                return Err(PersistenceError::Query {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }
}

async fn remove_database_files(path: &Path) {
    let mut files = vec![path.to_path_buf()];
    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        files.push(PathBuf::from(sidecar));
    }

    for file in files {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                file = strip_path(&file.to_string_lossy()),
                error = %e,
                "Failed to delete unusable database file"
            ),
        }
    }
}

/// A logical connection to one database file.
///
/// Cheap to create: the shared handle is acquired on first use and released
/// once when the connection is dropped.
pub struct DatabaseConnection {
    path: PathBuf,
    acquired: OnceCell<()>,
}

impl DatabaseConnection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            acquired: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` once this connection holds a reference to the shared handle.
    pub fn is_acquired(&self) -> bool {
        self.acquired.initialized()
    }

    async fn handle(&self) -> Result<(PoolCell, SqlitePool)> {
        self.acquired
            .get_or_try_init(|| async {
                ConnectionPool::acquire(&self.path).await.map(|_| ())
            })
            .await?;
        ConnectionPool::current(&self.path).await
    }

    /// Classifies a failed operation. A bad file is discarded once every
    /// connection of this operation has gone back to the pool.
    async fn finish<T>(&self, handle: &PoolCell, result: sqlx::Result<T>) -> Result<T> {
        let source = match result {
            Ok(value) => return Ok(value),
            Err(source) => source,
        };

        let error = PersistenceError::classify(&self.path, source);
        if error.is_bad_file() {
            ConnectionPool::discard(&self.path, handle).await;
        }
        Err(error)
    }

    /// Runs `op` on a pooled connection. Reads may run concurrently.
    pub async fn read<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, sqlx::Result<T>> + Send,
    {
        let (handle, pool) = self.handle().await?;
        let result = async {
            let mut conn = pool.acquire().await?;
            op(&mut *conn).await
        }
        .await;
        self.finish(&handle, result).await
    }

    /// Runs `op` inside a transaction, committing if it succeeds.
    pub async fn write<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, sqlx::Result<T>> + Send,
    {
        let (handle, pool) = self.handle().await?;
        let result = async {
            let mut tx = pool.begin().await?;
            let value = op(&mut *tx).await?;
            tx.commit().await?;
            Ok::<T, sqlx::Error>(value)
        }
        .await;
        self.finish(&handle, result).await
    }

    /// Applies pending migrations.
    pub async fn migrate(&self, migrator: &Migrator) -> Result<()> {
        let (handle, pool) = self.handle().await?;
        match migrator.run(&pool).await {
            Ok(()) => {}
            Err(sqlx::migrate::MigrateError::Execute(source)) => {
                return self.finish(&handle, Err(source)).await;
            }
            Err(source) => {
                return Err(PersistenceError::Migration {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        debug!(
            file = strip_path(&self.path.to_string_lossy()),
            "Database migrations applied"
        );
        Ok(())
    }
}

impl Drop for DatabaseConnection {
    fn drop(&mut self) {
        if self.acquired.initialized() {
            ConnectionPool::release(&self.path);
        }
    }
}

impl std::fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("path", &self.path)
            .field("acquired", &self.is_acquired())
            .finish()
    }
}
