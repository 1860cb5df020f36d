use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid database name '{0}'")]
    InvalidDatabaseName(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] core_persistence::PersistenceError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
