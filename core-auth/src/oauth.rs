//! Interactive OIDC login with PKCE
//!
//! Implements the login side of RFC 6749 (OAuth 2.0) with RFC 7636 (PKCE)
//! against an OpenID Connect provider discovered from its issuer URL.
//!
//! # Overview
//!
//! [`OidcCaller::login`] runs the whole flow:
//! 1. Fetch `{issuer}/.well-known/openid-configuration`
//! 2. Build the authorization URL with a PKCE challenge and random state
//! 3. Hand it to the host's [`AuthorizationPresenter`] and wait for the redirect
//! 4. Verify the callback state and exchange the code at the token endpoint
//!
//! Only one login may be in flight per caller. The pending authorization is
//! held until the attempt completes, fails or is abandoned.
//!
//! # Security
//!
//! - PKCE S256 challenge; the verifier never leaves this process except in the
//!   code exchange
//! - The callback `state` must match the one sent
//! - Tokens, codes and verifiers are never logged

use crate::error::{AuthError, Result};
use crate::session::{AuthenticationData, OidcAuthenticationData};
use crate::types::{TokenErrorResponse, TokenResponse, TokenState};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::authorization::{AuthorizationPresenter, AuthorizationRequest};
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest};
use core_runtime::config::OAuthAppConfiguration;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Scopes requested on every login, ahead of the configured ones.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile"];

/// Performs the interactive login.
#[async_trait]
pub trait OAuthCaller: Send + Sync {
    /// Runs discovery and the interactive authorization, returning a new session.
    async fn login(
        &self,
        configuration: &OAuthAppConfiguration,
        presenter: &dyn AuthorizationPresenter,
    ) -> Result<Arc<dyn AuthenticationData>>;
}

/// The subset of the OIDC discovery document the login flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

/// PKCE (Proof Key for Code Exchange) verifier.
///
/// Also carries the `state` parameter used for CSRF protection.
#[derive(Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// Generates a 32-byte code verifier and a 16-byte state, both
    /// base64-url-encoded without padding.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);

        Self {
            verifier: URL_SAFE_NO_PAD.encode(verifier_bytes),
            state: URL_SAFE_NO_PAD.encode(state_bytes),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// BASE64URL(SHA256(code_verifier))
    pub fn challenge(&self) -> String {
        let hash = Sha256::digest(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// Discovery URL for an issuer. Issuers with a path keep it.
pub fn discovery_url(issuer: &Url) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.as_str().trim_end_matches('/')
    )
}

/// `openid profile` followed by the configured scopes, without duplicates.
pub fn login_scopes(configuration: &OAuthAppConfiguration) -> Vec<String> {
    let mut scopes: Vec<String> = DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect();
    for scope in &configuration.scopes {
        if !scopes.contains(scope) {
            scopes.push(scope.clone());
        }
    }
    scopes
}

/// Builds the authorization endpoint URL for one attempt.
pub fn build_authorization_url(
    authorization_endpoint: &str,
    configuration: &OAuthAppConfiguration,
    verifier: &PkceVerifier,
) -> Result<String> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| {
        AuthError::OAuthDiscoveryFailed(format!("Invalid authorization endpoint: {}", e))
    })?;

    url.query_pairs_mut()
        .append_pair("client_id", &configuration.client_id)
        .append_pair("redirect_uri", configuration.redirect_url.as_str())
        .append_pair("response_type", "code")
        .append_pair("scope", &login_scopes(configuration).join(" "))
        .append_pair("state", verifier.state())
        .append_pair("code_challenge", &verifier.challenge())
        .append_pair("code_challenge_method", "S256");

    Ok(url.to_string())
}

/// Extracts the authorization code from the redirect URL.
pub fn parse_callback(callback_url: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(callback_url).map_err(|e| {
        AuthError::OAuthAuthenticationFailed(format!("Invalid callback URL: {}", e))
    })?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let reason = match error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(AuthError::OAuthAuthenticationFailed(reason));
    }

    if state.as_deref() != Some(expected_state) {
        warn!("OAuth callback state does not match the pending authorization");
        return Err(AuthError::StateMismatch);
    }

    code.ok_or_else(|| {
        AuthError::OAuthAuthenticationFailed("Callback carries no authorization code".to_string())
    })
}

/// Clears the pending authorization when the login attempt ends, including
/// when its future is dropped mid-flight.
struct PendingAuthorizationGuard<'a> {
    slot: &'a Mutex<Option<PkceVerifier>>,
}

impl Drop for PendingAuthorizationGuard<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// [`OAuthCaller`] for OpenID Connect providers.
pub struct OidcCaller {
    http_client: Arc<dyn HttpClient>,
    pending: Mutex<Option<PkceVerifier>>,
}

impl OidcCaller {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            pending: Mutex::new(None),
        }
    }

    pub fn is_login_in_progress(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn begin(&self, verifier: PkceVerifier) -> Result<PendingAuthorizationGuard<'_>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() {
            return Err(AuthError::LoginInProgress);
        }
        *pending = Some(verifier);
        Ok(PendingAuthorizationGuard {
            slot: &self.pending,
        })
    }

    /// Fetches the provider's discovery document.
    #[instrument(skip(self), fields(issuer = %issuer))]
    pub async fn discover(&self, issuer: &Url) -> Result<ProviderMetadata> {
        let response = self
            .http_client
            .execute(HttpRequest::get(discovery_url(issuer)))
            .await
            .map_err(|e| AuthError::OAuthDiscoveryFailed(e.to_string()))?;

        if !response.is_success() {
            return Err(AuthError::OAuthDiscoveryFailed(format!(
                "Discovery endpoint returned {}",
                response.status
            )));
        }

        let metadata: ProviderMetadata = response.json().map_err(|e| {
            AuthError::OAuthDiscoveryFailed(format!("Invalid discovery document: {}", e))
        })?;

        debug!(token_endpoint = %metadata.token_endpoint, "Discovered OIDC provider");
        Ok(metadata)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        configuration: &OAuthAppConfiguration,
        code: &str,
        verifier: &PkceVerifier,
    ) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", configuration.redirect_url.as_str()),
            ("client_id", configuration.client_id.as_str()),
            ("code_verifier", verifier.verifier()),
        ];
        let body = serde_urlencoded::to_string(params).map_err(|e| {
            AuthError::OAuthAuthenticationFailed(format!("Failed to encode token request: {}", e))
        })?;

        let response = self
            .http_client
            .execute(HttpRequest::post(token_endpoint).form(body))
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.is_success() {
            let status = response.status;
            let reason = response
                .json::<TokenErrorResponse>()
                .map(|e| e.to_string())
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            warn!(status, error = %reason, "Authorization code exchange failed");
            return Err(AuthError::OAuthAuthenticationFailed(format!(
                "Token endpoint returned {}: {}",
                status, reason
            )));
        }

        response.json().map_err(|e| {
            AuthError::OAuthAuthenticationFailed(format!("Failed to parse token response: {}", e))
        })
    }
}

#[async_trait]
impl OAuthCaller for OidcCaller {
    #[instrument(skip(self, configuration, presenter), fields(issuer = %configuration.issuer_url))]
    async fn login(
        &self,
        configuration: &OAuthAppConfiguration,
        presenter: &dyn AuthorizationPresenter,
    ) -> Result<Arc<dyn AuthenticationData>> {
        let verifier = PkceVerifier::new();
        let _pending = self.begin(verifier.clone())?;

        let metadata = self.discover(&configuration.issuer_url).await?;

        let authorization_url =
            build_authorization_url(&metadata.authorization_endpoint, configuration, &verifier)?;

        let callback = presenter
            .present(AuthorizationRequest {
                authorization_url,
                redirect_url: configuration.redirect_url.to_string(),
            })
            .await
            .map_err(|e| match e {
                BridgeError::Cancelled => {
                    AuthError::OAuthAuthenticationFailed("User cancelled the login".to_string())
                }
                other => AuthError::OAuthAuthenticationFailed(other.to_string()),
            })?;

        let code = parse_callback(&callback, verifier.state())?;
        let tokens = self
            .exchange_code(&metadata.token_endpoint, configuration, &code, &verifier)
            .await?;

        let expires_at = tokens.expires_at().ok_or_else(|| {
            AuthError::OAuthAuthenticationFailed(format!(
                "Token endpoint returned an invalid expires_in: {}",
                tokens.expires_in
            ))
        })?;
        info!(expires_in = tokens.expires_in, "Login completed");

        let state = TokenState::from_token_response(
            tokens,
            expires_at,
            metadata.token_endpoint,
            configuration.client_id.clone(),
        );
        Ok(Arc::new(OidcAuthenticationData::new(
            Some(state),
            Arc::clone(&self.http_client),
        )))
    }
}
