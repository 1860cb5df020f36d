//! Core types for the authentication session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible authentication status.
///
/// Derived on every read, never stored.
///
/// ```
/// use core_auth::AuthenticationState;
///
/// assert_eq!(AuthenticationState::default(), AuthenticationState::NotAuthenticated);
/// assert_eq!(AuthenticationState::NotAvailable.to_string(), "Not Available");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationState {
    /// No OAuth configuration; authentication can never succeed in this process.
    NotAvailable,
    /// Configured, but there is no authorized session.
    #[default]
    NotAuthenticated,
    Authenticated,
}

impl AuthenticationState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthenticationState::Authenticated)
    }
}

impl fmt::Display for AuthenticationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationState::NotAvailable => write!(f, "Not Available"),
            AuthenticationState::NotAuthenticated => write!(f, "Not Authenticated"),
            AuthenticationState::Authenticated => write!(f, "Authenticated"),
        }
    }
}

/// Provider token material behind an OIDC session.
///
/// Holds everything needed to refresh without rediscovering the issuer, so a
/// state decoded from storage is usable immediately.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` when the provider did not report a lifetime.
    pub expires_at: Option<DateTime<Utc>>,
    pub id_token: Option<String>,
    pub token_endpoint: String,
    pub client_id: String,
    /// Set when the provider rejected the grant (for example `invalid_grant`).
    /// A state carrying an error is never authorized again.
    #[serde(default)]
    pub authorization_error: Option<String>,
}

impl TokenState {
    /// `expires_at` comes from [`TokenResponse::expires_at`], checked by the caller.
    pub(crate) fn from_token_response(
        response: TokenResponse,
        expires_at: DateTime<Utc>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Some(expires_at),
            id_token: response.id_token,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            authorization_error: None,
        }
    }

    /// Applies a refresh response. Providers that do not rotate refresh tokens
    /// omit them, in which case the current one is kept.
    pub(crate) fn apply_refresh(&mut self, response: TokenResponse, expires_at: DateTime<Utc>) {
        self.access_token = response.access_token;
        if response.refresh_token.is_some() {
            self.refresh_token = response.refresh_token;
        }
        if response.id_token.is_some() {
            self.id_token = response.id_token;
        }
        self.expires_at = Some(expires_at);
        self.authorization_error = None;
    }

    /// `true` if the access token is expired or expires within `buffer_seconds`.
    pub fn is_expired_with_buffer(&self, buffer_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let refresh_at = Duration::try_seconds(buffer_seconds)
                    .and_then(|buffer| expires_at.checked_sub_signed(buffer))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                Utc::now() >= refresh_at
            }
            None => false,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization_error.is_none()
            && (self.refresh_token.is_some() || !self.is_expired_with_buffer(0))
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("authorization_error", &self.authorization_error)
            .finish()
    }
}

/// Token endpoint success body.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry of the access token, or `None` when `expires_in` does
    /// not fit in a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
    }
}

fn default_expires_in() -> i64 {
    3600
}

/// Token endpoint error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

impl fmt::Display for TokenErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}
