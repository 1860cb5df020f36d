//! Authentication session state
//!
//! [`AuthenticationData`] is the capability-typed view the client has of a
//! session: whether it is authorized, a way to get a usable access token, a
//! change stream, and a byte encoding for persistence. The client never looks
//! inside the token material.
//!
//! [`OidcAuthenticationData`] is the provider-backed implementation. It owns a
//! [`TokenState`], refreshes it against the token endpoint when needed and
//! fires its change stream on every mutation, including refreshes triggered by
//! `get_fresh_tokens`.

use crate::error::{AuthError, Result};
use crate::types::{TokenErrorResponse, TokenResponse, TokenState};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

/// Refresh when the access token expires within this many seconds.
pub const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

/// Version tag of the persisted session envelope.
pub const SESSION_ENCODING_VERSION: u32 = 1;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// A session as seen by the authentication client.
#[async_trait]
pub trait AuthenticationData: Send + Sync {
    fn is_authorized(&self) -> bool;

    /// Returns a valid access token, refreshing first if needed.
    ///
    /// A refresh mutates the session and fires [`changes`](Self::changes).
    async fn get_fresh_tokens(&self) -> Result<String>;

    /// Subscribes to state changes. Fires once per mutation of the token state.
    fn changes(&self) -> broadcast::Receiver<()>;

    /// Encodes the session for persistence.
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Rebuilds sessions from bytes produced by [`AuthenticationData::encode`].
///
/// Decoding needs live collaborators (the HTTP client used for refreshes), so
/// it is provided by whoever creates sessions rather than by the bytes alone.
pub trait SessionRestorer: Send + Sync {
    fn restore(&self, bytes: &[u8]) -> Result<Arc<dyn AuthenticationData>>;
}

#[derive(Serialize, Deserialize)]
struct SessionEnvelope {
    version: u32,
    state: Option<TokenState>,
}

/// OIDC provider-backed session.
pub struct OidcAuthenticationData {
    state: RwLock<Option<TokenState>>,
    http_client: Arc<dyn HttpClient>,
    refresh_lock: Mutex<()>,
    changes: broadcast::Sender<()>,
}

impl OidcAuthenticationData {
    /// Wraps token material. `None` is the uninitialized session: never
    /// authorized and unable to produce tokens.
    pub fn new(state: Option<TokenState>, http_client: Arc<dyn HttpClient>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(state),
            http_client,
            refresh_lock: Mutex::new(()),
            changes,
        }
    }

    /// Decodes a session envelope written by [`AuthenticationData::encode`].
    pub fn decode(bytes: &[u8], http_client: Arc<dyn HttpClient>) -> Result<Self> {
        let envelope: SessionEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| AuthError::SerializationFailed(e.to_string()))?;

        if envelope.version != SESSION_ENCODING_VERSION {
            return Err(AuthError::SerializationFailed(format!(
                "Unsupported session encoding version {}",
                envelope.version
            )));
        }

        Ok(Self::new(envelope.state, http_client))
    }

    /// Snapshot of the current token material.
    pub fn token_state(&self) -> Option<TokenState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_state(&self, update: impl FnOnce(&mut TokenState)) {
        {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = guard.as_mut() {
                update(state);
            }
        }
        // No receivers is fine: nobody is persisting this session yet.
        let _ = self.changes.send(());
    }

    async fn refresh(&self, snapshot: &TokenState, refresh_token: &str) -> Result<String> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", snapshot.client_id.as_str()),
        ];
        let body = serde_urlencoded::to_string(params).map_err(|e| {
            AuthError::RefreshFailed(format!("Failed to encode refresh request: {}", e))
        })?;

        let request = HttpRequest::post(snapshot.token_endpoint.clone()).form(body);

        let response = self.http_client.execute(request).await.map_err(|e| {
            warn!(error = %e, "Token refresh request failed");
            AuthError::RefreshFailed(e.to_string())
        })?;

        if response.is_success() {
            let token_response: TokenResponse = response.json().map_err(|e| {
                AuthError::RefreshFailed(format!("Failed to parse token response: {}", e))
            })?;
            let expires_at = token_response.expires_at().ok_or_else(|| {
                warn!(
                    expires_in = token_response.expires_in,
                    "Token endpoint returned an unusable lifetime"
                );
                AuthError::RefreshFailed(format!(
                    "Token endpoint returned an invalid expires_in: {}",
                    token_response.expires_in
                ))
            })?;
            let access_token = token_response.access_token.clone();
            info!(
                expires_in = token_response.expires_in,
                "Refreshed access token"
            );
            self.update_state(|state| state.apply_refresh(token_response, expires_at));
            return Ok(access_token);
        }

        let status = response.status;
        let reason = response
            .json::<TokenErrorResponse>()
            .map(|e| e.to_string())
            .or_else(|_| response.text())
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        if response.is_client_error() {
            // The grant itself was rejected; this session cannot recover.
            warn!(
                status,
                error = %reason,
                "Token refresh rejected, session is no longer authorized"
            );
            let recorded = reason.clone();
            self.update_state(|state| state.authorization_error = Some(recorded));
        } else {
            warn!(status, error = %reason, "Token refresh failed");
        }

        Err(AuthError::RefreshFailed(format!(
            "Token endpoint returned {}: {}",
            status, reason
        )))
    }
}

#[async_trait]
impl AuthenticationData for OidcAuthenticationData {
    fn is_authorized(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(TokenState::is_authorized)
            .unwrap_or(false)
    }

    #[instrument(skip(self))]
    async fn get_fresh_tokens(&self) -> Result<String> {
        // Serializes refreshes; a waiter sees the state the winner produced.
        let _guard = self.refresh_lock.lock().await;

        let snapshot = self
            .token_state()
            .ok_or_else(|| AuthError::RefreshFailed("Session holds no token state".to_string()))?;

        if let Some(error) = &snapshot.authorization_error {
            return Err(AuthError::RefreshFailed(format!(
                "Authorization was revoked: {}",
                error
            )));
        }

        if !snapshot.is_expired_with_buffer(TOKEN_REFRESH_BUFFER_SECS) {
            debug!("Access token is valid, no refresh needed");
            return Ok(snapshot.access_token);
        }

        let Some(refresh_token) = snapshot.refresh_token.clone() else {
            return Err(AuthError::RefreshFailed(
                "Access token expired and no refresh token is available".to_string(),
            ));
        };

        debug!("Access token expired or expiring soon, refreshing");
        self.refresh(&snapshot, &refresh_token).await
    }

    fn changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let envelope = SessionEnvelope {
            version: SESSION_ENCODING_VERSION,
            state: self.token_state(),
        };
        serde_json::to_vec(&envelope).map_err(|e| AuthError::SerializationFailed(e.to_string()))
    }
}

/// Restores [`OidcAuthenticationData`] sessions, wiring them to an HTTP client.
pub struct OidcSessionRestorer {
    http_client: Arc<dyn HttpClient>,
}

impl OidcSessionRestorer {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }
}

impl SessionRestorer for OidcSessionRestorer {
    fn restore(&self, bytes: &[u8]) -> Result<Arc<dyn AuthenticationData>> {
        let session = OidcAuthenticationData::decode(bytes, Arc::clone(&self.http_client))?;
        Ok(Arc::new(session))
    }
}
