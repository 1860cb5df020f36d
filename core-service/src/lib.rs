//! Core service façade and bootstrap helpers.
//!
//! This crate wires a [`CoreConfig`] (host bridges plus the optional OAuth
//! registration) into the shared Rust core: a ready [`AuthenticationClientImpl`]
//! and [`DatabaseConnection`]s under the configured database directory.
//! Desktop apps typically enable the `desktop-shims` feature, which supplies
//! the keyring secure store and reqwest HTTP client when none are injected.

pub mod error;

pub use error::{CoreError, Result};

pub use core_auth::{
    AuthError, AuthenticationClient, AuthenticationClientImpl, AuthenticationState,
};
pub use core_persistence::{DatabaseConnection, Migrator, PersistenceError};
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder, OAuthAppConfiguration};

use core_auth::{OAuthCaller, OidcCaller, OidcSessionRestorer, SecureStorePersistence};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// File extension of database files created by [`CoreService::database`].
pub const DATABASE_EXTENSION: &str = "db";

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    auth: Arc<AuthenticationClientImpl>,
}

impl CoreService {
    /// Create a new service using the OIDC login flow.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let caller = Arc::new(OidcCaller::new(Arc::clone(&config.http_client)));
        Self::with_oauth_caller(config, caller)
    }

    /// Create a new service with a custom interactive login.
    pub fn with_oauth_caller(config: CoreConfig, caller: Arc<dyn OAuthCaller>) -> Result<Self> {
        config.validate()?;

        let restorer = Arc::new(OidcSessionRestorer::new(Arc::clone(&config.http_client)));
        let persistence = Arc::new(SecureStorePersistence::new(
            Arc::clone(&config.secure_store),
            restorer,
            config.session_storage_key.clone(),
        ));
        let auth = AuthenticationClientImpl::new(config.oauth.clone(), caller, persistence);

        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The authentication client shared by every clone of this service.
    pub fn auth(&self) -> Arc<AuthenticationClientImpl> {
        Arc::clone(&self.auth)
    }

    /// Path of the database file called `name`.
    pub fn database_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CoreError::InvalidDatabaseName(name.to_string()));
        }

        Ok(self
            .config
            .database_dir
            .join(format!("{}.{}", name, DATABASE_EXTENSION)))
    }

    /// A lazily-opened connection to the database called `name`.
    ///
    /// Connections to the same name share one open file.
    pub fn database(&self, name: &str) -> Result<DatabaseConnection> {
        Ok(DatabaseConnection::new(self.database_path(name)?))
    }
}

/// Builds the service and restores the persisted session, if authentication
/// is available.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_service::{bootstrap, AuthenticationClient, CoreConfig, OAuthAppConfiguration};
///
/// let config = CoreConfig::builder()
///     .maybe_oauth(OAuthAppConfiguration::from_env()?)
///     .database_dir("/path/to/databases")
///     .build()?;
/// let core = bootstrap(config).await?;
/// let state = core.auth().authentication_state().await;
/// # Ok(())
/// # }
/// ```
#[instrument(skip(config))]
pub async fn bootstrap(config: CoreConfig) -> Result<CoreService> {
    let service = CoreService::new(config)?;

    if service.config.is_auth_available() {
        let authorized = service.auth.restore_state().await?;
        info!(authorized, "Core service ready");
    } else {
        info!("Core service ready without authentication");
    }

    Ok(service)
}
