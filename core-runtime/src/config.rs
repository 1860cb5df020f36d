//! # Core Configuration Module
//!
//! Provides configuration management for the Quran data layer.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings. It enforces
//! fail-fast validation so missing bridges are reported at startup instead of
//! at first use.
//!
//! ## OAuth configuration
//!
//! [`OAuthAppConfiguration`] is optional. Leaving it out is not an error: the
//! authentication client then reports `NotAvailable` for the lifetime of the
//! process and every auth operation fails with `ConfigurationMissing`.
//!
//! ## Required Dependencies
//!
//! - `SecureStore` - session persistence (desktop default: keyring)
//! - `HttpClient` - OIDC discovery and token requests (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled, the desktop defaults are
//! injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, OAuthAppConfiguration};
//!
//! let oauth = OAuthAppConfiguration::new(
//!     "https://idp.example",
//!     "abc",
//!     "app://cb",
//! )?
//! .with_scopes(["bookmark"]);
//!
//! let config = CoreConfig::builder()
//!     .database_dir("/path/to/databases")
//!     .oauth(oauth)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, SecureStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Environment variable holding the OIDC issuer URL.
pub const ENV_ISSUER_URL: &str = "QURAN_OAUTH_ISSUER_URL";
/// Environment variable holding the OAuth client identifier.
pub const ENV_CLIENT_ID: &str = "QURAN_OAUTH_CLIENT_ID";
/// Environment variable holding the registered redirect URL.
pub const ENV_REDIRECT_URL: &str = "QURAN_OAUTH_REDIRECT_URL";
/// Environment variable holding extra scopes, separated by spaces.
pub const ENV_SCOPES: &str = "QURAN_OAUTH_SCOPES";

/// Secure-store key the session blob is written under unless overridden.
pub const DEFAULT_SESSION_STORAGE_KEY: &str = "quran.auth.session";

/// OAuth application registration, supplied once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAppConfiguration {
    /// OIDC issuer; discovery is fetched relative to it.
    pub issuer_url: Url,
    pub client_id: String,
    pub redirect_url: Url,
    /// Scopes requested in addition to `openid` and `profile`.
    pub scopes: Vec<String>,
}

impl OAuthAppConfiguration {
    /// Validates and builds a configuration with no extra scopes.
    pub fn new(
        issuer_url: impl AsRef<str>,
        client_id: impl Into<String>,
        redirect_url: impl AsRef<str>,
    ) -> Result<Self> {
        let issuer_url = Url::parse(issuer_url.as_ref())
            .map_err(|e| Error::Config(format!("Invalid OAuth issuer URL: {}", e)))?;
        if !matches!(issuer_url.scheme(), "https" | "http") {
            return Err(Error::Config(format!(
                "OAuth issuer URL must use http(s), got '{}'",
                issuer_url.scheme()
            )));
        }

        let redirect_url = Url::parse(redirect_url.as_ref())
            .map_err(|e| Error::Config(format!("Invalid OAuth redirect URL: {}", e)))?;

        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::Config("OAuth client id cannot be empty".to_string()));
        }

        Ok(Self {
            issuer_url,
            client_id,
            redirect_url,
            scopes: Vec::new(),
        })
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Reads the configuration from `QURAN_OAUTH_*` environment variables.
    ///
    /// Returns `Ok(None)` when the issuer or client id is unset, which puts
    /// authentication in its unavailable mode.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (Some(issuer), Some(client_id)) = (non_empty(ENV_ISSUER_URL), non_empty(ENV_CLIENT_ID))
        else {
            return Ok(None);
        };
        let redirect = non_empty(ENV_REDIRECT_URL).ok_or_else(|| {
            Error::Config(format!(
                "{} is set but {} is missing",
                ENV_ISSUER_URL, ENV_REDIRECT_URL
            ))
        })?;
        let scopes = lookup(ENV_SCOPES)
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(Some(Self::new(issuer, client_id, redirect)?.with_scopes(scopes)))
    }
}

/// Core configuration for the Quran data layer.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// OAuth registration; `None` means authentication is unavailable.
    pub oauth: Option<OAuthAppConfiguration>,

    /// Directory holding the app's SQLite database files
    pub database_dir: PathBuf,

    pub secure_store: Arc<dyn SecureStore>,

    pub http_client: Arc<dyn HttpClient>,

    /// Secure-store key of the persisted session
    pub session_storage_key: String,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("oauth", &self.oauth)
            .field("database_dir", &self.database_dir)
            .field("secure_store", &"SecureStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("session_storage_key", &self.session_storage_key)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Checks values the builder cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if self.database_dir.as_os_str().is_empty() {
            return Err(Error::Config("Database directory cannot be empty".to_string()));
        }

        if self.session_storage_key.trim().is_empty() {
            return Err(Error::Config(
                "Session storage key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_auth_available(&self) -> bool {
        self.oauth.is_some()
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::capability_missing(
        "SecureStore",
        "SecureStore implementation is required for session persistence. \
         Desktop: enable the 'desktop-shims' feature to use the default KeyringSecureStore. \
         Mobile: inject platform-native secure storage (Keychain/Keystore).",
    )
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::capability_missing(
        "HttpClient",
        "HttpClient implementation is required for OIDC discovery and token refresh. \
         Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
         Mobile: inject the platform HTTP stack (URLSession/OkHttp).",
    )
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    oauth: Option<OAuthAppConfiguration>,
    database_dir: Option<PathBuf>,
    secure_store: Option<Arc<dyn SecureStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    session_storage_key: Option<String>,
}

impl CoreConfigBuilder {
    /// Sets the OAuth registration. Leave unset to run without authentication.
    pub fn oauth(mut self, config: OAuthAppConfiguration) -> Self {
        self.oauth = Some(config);
        self
    }

    /// Sets the OAuth registration from an optional value, as returned by
    /// [`OAuthAppConfiguration::from_env`].
    pub fn maybe_oauth(mut self, config: Option<OAuthAppConfiguration>) -> Self {
        self.oauth = config;
        self
    }

    /// Sets the directory database files are created in.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_dir("/path/to/databases");
    /// ```
    pub fn database_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_dir = Some(path.into());
        self
    }

    /// Sets the secure store implementation.
    ///
    /// The store must provide platform-appropriate security (Keychain on
    /// macOS/iOS, Keystore on Android) since it holds refresh tokens.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based desktop default is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Overrides the secure-store key of the persisted session.
    ///
    /// Default: [`DEFAULT_SESSION_STORAGE_KEY`]
    pub fn session_storage_key(mut self, key: impl Into<String>) -> Self {
        self.session_storage_key = Some(key.into());
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if:
    /// - The database directory is missing
    /// - A required bridge is missing and no desktop default is available
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let database_dir = self.database_dir.ok_or_else(|| {
            Error::Config(
                "Database directory is required. Use .database_dir() to set it.".to_string(),
            )
        })?;

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            oauth: self.oauth,
            database_dir,
            secure_store,
            http_client,
            session_storage_key: self
                .session_storage_key
                .unwrap_or_else(|| DEFAULT_SESSION_STORAGE_KEY.to_string()),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse};
    use std::collections::HashMap;

    struct MockSecureStore;

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, _key: &str, _value: &[u8]) -> bridge_traits::error::Result<()> {
            Ok(())
        }

        async fn get_secret(&self, _key: &str) -> bridge_traits::error::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn delete_secret(&self, _key: &str) -> bridge_traits::error::Result<()> {
            Ok(())
        }
    }

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> bridge_traits::error::Result<HttpResponse> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    fn mock_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .secure_store(Arc::new(MockSecureStore))
            .http_client(Arc::new(MockHttpClient))
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_oauth_configuration_new() {
        let config = OAuthAppConfiguration::new("https://idp.example", "abc", "app://cb")
            .unwrap()
            .with_scopes(["bookmark", "collection"]);

        assert_eq!(config.issuer_url.as_str(), "https://idp.example/");
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.redirect_url.as_str(), "app://cb");
        assert_eq!(config.scopes, vec!["bookmark", "collection"]);
    }

    #[test]
    fn test_oauth_configuration_rejects_invalid_values() {
        assert!(matches!(
            OAuthAppConfiguration::new("not a url", "abc", "app://cb"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            OAuthAppConfiguration::new("ftp://idp.example", "abc", "app://cb"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            OAuthAppConfiguration::new("https://idp.example", "  ", "app://cb"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_oauth_from_env_unset_is_unavailable() {
        let config = OAuthAppConfiguration::from_lookup(lookup(&[])).unwrap();
        assert!(config.is_none());

        let config =
            OAuthAppConfiguration::from_lookup(lookup(&[(ENV_ISSUER_URL, "https://idp.example")]))
                .unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_oauth_from_env_reads_all_values() {
        let config = OAuthAppConfiguration::from_lookup(lookup(&[
            (ENV_ISSUER_URL, "https://idp.example"),
            (ENV_CLIENT_ID, "abc"),
            (ENV_REDIRECT_URL, "app://cb"),
            (ENV_SCOPES, "bookmark  collection"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(config.client_id, "abc");
        assert_eq!(config.scopes, vec!["bookmark", "collection"]);
    }

    #[test]
    fn test_oauth_from_env_missing_redirect_is_error() {
        let result = OAuthAppConfiguration::from_lookup(lookup(&[
            (ENV_ISSUER_URL, "https://idp.example"),
            (ENV_CLIENT_ID, "abc"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_requires_database_dir() {
        let result = mock_builder().build();
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Database directory")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_defaults() {
        let config = mock_builder().database_dir("/tmp/quran").build().unwrap();

        assert!(!config.is_auth_available());
        assert_eq!(config.session_storage_key, DEFAULT_SESSION_STORAGE_KEY);
        assert_eq!(config.database_dir, PathBuf::from("/tmp/quran"));
    }

    #[test]
    fn test_builder_with_oauth() {
        let oauth = OAuthAppConfiguration::new("https://idp.example", "abc", "app://cb").unwrap();
        let config = mock_builder()
            .database_dir("/tmp/quran")
            .oauth(oauth.clone())
            .session_storage_key("custom.session")
            .build()
            .unwrap();

        assert!(config.is_auth_available());
        assert_eq!(config.oauth, Some(oauth));
        assert_eq!(config.session_storage_key, "custom.session");
    }

    #[test]
    fn test_builder_rejects_empty_storage_key() {
        let result = mock_builder()
            .database_dir("/tmp/quran")
            .session_storage_key(" ")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridges_without_shims() {
        let result = CoreConfig::builder().database_dir("/tmp/quran").build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "SecureStore")
            }
            other => panic!("Expected CapabilityMissing, got {:?}", other),
        }

        let result = CoreConfig::builder()
            .database_dir("/tmp/quran")
            .secure_store(Arc::new(MockSecureStore))
            .build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient")
            }
            other => panic!("Expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_are_injected() {
        let config = CoreConfig::builder().database_dir("/tmp/quran").build();
        assert!(config.is_ok());
    }
}
