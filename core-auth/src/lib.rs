//! # Authentication Module
//!
//! OAuth 2.0 / OpenID Connect session lifecycle for the Quran data layer.
//!
//! ## Overview
//!
//! This crate logs the user in through the configured OIDC provider, keeps the
//! resulting session fresh and durable, and signs outgoing API requests with
//! it. Host applications talk to [`AuthenticationClient`]; the other types are
//! its collaborators and can be replaced for tests or other providers.
//!
//! ## Features
//!
//! - Authorization-code flow with PKCE, discovered from the issuer URL
//! - Automatic token refresh shortly before expiry
//! - Session persisted in the platform secure store and re-persisted on change
//! - Permanent "not available" mode when no OAuth configuration is supplied
//! - Request decoration with `x-auth-token` and `x-client-id`

pub mod client;
pub mod error;
pub mod oauth;
pub mod persistence;
pub mod session;
pub mod types;

pub use client::{
    AuthenticationClient, AuthenticationClientImpl, AUTH_TOKEN_HEADER, CLIENT_ID_HEADER,
};
pub use error::{AuthError, Result};
pub use oauth::{OAuthCaller, OidcCaller, PkceVerifier, ProviderMetadata};
pub use persistence::{Persistence, SecureStorePersistence};
pub use session::{
    AuthenticationData, OidcAuthenticationData, OidcSessionRestorer, SessionRestorer,
    TOKEN_REFRESH_BUFFER_SECS,
};
pub use types::{AuthenticationState, TokenState};
