//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `HttpClient` using `reqwest`
//! - `SecureStore` using the `keyring` crate
//!
//! The `AuthorizationPresenter` has no desktop default: showing the identity
//! provider's page is left to the embedding application.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{KeyringSecureStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new());
//! let secure_store = Arc::new(KeyringSecureStore::new());
//! ```

mod http;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;

#[cfg(feature = "secure-store")]
pub use secure_store::{KeyringSecureStore, DEFAULT_SERVICE_NAME};
