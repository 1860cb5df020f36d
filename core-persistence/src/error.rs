use sqlx::migrate::MigrateError;
use std::path::PathBuf;
use thiserror::Error;

/// Primary SQLite result codes that mean the file itself is unusable.
const SQLITE_PERM: i32 = 3;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;

/// Primary SQLite result codes for lock contention.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The database file is corrupt, not a database, or cannot be opened with
    /// the required permissions.
    #[error("Database file {} is unusable: {source}", path.display())]
    BadFile {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database query on {} failed: {source}", path.display())]
    Query {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration of {} failed: {source}", path.display())]
    Migration {
        path: PathBuf,
        #[source]
        source: MigrateError,
    },

    #[error("Failed to prepare database directory for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PersistenceError {
    /// Wraps a sqlx error as [`BadFile`](Self::BadFile) or
    /// [`Query`](Self::Query) by its SQLite result code.
    pub fn classify(path: impl Into<PathBuf>, source: sqlx::Error) -> Self {
        let path = path.into();
        if is_bad_file(&source) {
            PersistenceError::BadFile { path, source }
        } else {
            PersistenceError::Query { path, source }
        }
    }

    pub fn is_bad_file(&self) -> bool {
        matches!(self, PersistenceError::BadFile { .. })
    }
}

/// Primary result code (the low byte of the extended code) of a database error.
pub(crate) fn primary_code(error: &sqlx::Error) -> Option<i32> {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff),
        _ => None,
    }
}

pub(crate) fn is_bad_file(error: &sqlx::Error) -> bool {
    matches!(
        primary_code(error),
        Some(SQLITE_PERM | SQLITE_CORRUPT | SQLITE_CANTOPEN | SQLITE_NOTADB)
    )
}

pub(crate) fn is_busy(error: &sqlx::Error) -> bool {
    matches!(primary_code(error), Some(SQLITE_BUSY | SQLITE_LOCKED))
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_query_errors() {
        let error = PersistenceError::classify("/tmp/quran.db", sqlx::Error::RowNotFound);
        assert!(matches!(error, PersistenceError::Query { .. }));
        assert!(!error.is_bad_file());

        assert!(!is_busy(&sqlx::Error::PoolTimedOut));
        assert_eq!(primary_code(&sqlx::Error::PoolClosed), None);
    }

    #[test]
    fn test_error_display_names_the_file() {
        let error = PersistenceError::classify("/data/quran.db", sqlx::Error::RowNotFound);
        assert!(error.to_string().contains("/data/quran.db"));
    }
}
