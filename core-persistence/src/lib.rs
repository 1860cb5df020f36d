//! # Persistence Module
//!
//! SQLite access for the Quran data layer.
//!
//! Every database file is opened at most once per process and shared by all
//! [`DatabaseConnection`]s pointing at it. Opening handles lock contention with
//! a bounded retry and removes files SQLite reports as unusable, so the next
//! open starts clean instead of failing forever.

pub mod connection;
pub mod error;

pub use connection::{ConnectionPool, DatabaseConnection, BUSY_TIMEOUT, OPEN_ATTEMPTS};
pub use error::{PersistenceError, Result};
pub use sqlx::migrate::Migrator;
