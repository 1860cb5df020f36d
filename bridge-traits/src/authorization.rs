//! Interactive Authorization Abstraction
//!
//! The OAuth authorization-code flow needs the host to show the identity
//! provider's page (an in-app browser tab on mobile, the system browser on
//! desktop) and to capture the redirect back into the app. This is the only
//! part of login that touches UI, so it is modelled as a bridge capability and
//! passed to `login` as its UI context.

use async_trait::async_trait;

use crate::error::Result;

/// A single authorization page presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Fully built authorization endpoint URL, including PKCE and state.
    pub authorization_url: String,
    /// Redirect URL registered for the app; the presenter completes once the
    /// provider navigates to a URL with this prefix.
    pub redirect_url: String,
}

/// Presents the authorization page and waits for the redirect.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::authorization::{AuthorizationPresenter, AuthorizationRequest};
///
/// struct SystemBrowser;
///
/// #[async_trait::async_trait]
/// impl AuthorizationPresenter for SystemBrowser {
///     async fn present(&self, request: AuthorizationRequest) -> Result<String> {
///         open::that(&request.authorization_url)?;
///         wait_for_loopback_redirect(&request.redirect_url).await
///     }
/// }
/// ```
#[async_trait]
pub trait AuthorizationPresenter: Send + Sync {
    /// Show the page and resolve with the full redirect URL (including the
    /// `code`/`state` or `error` query parameters).
    ///
    /// Returns [`BridgeError::Cancelled`](crate::error::BridgeError::Cancelled)
    /// when the user dismisses the page.
    async fn present(&self, request: AuthorizationRequest) -> Result<String>;
}
