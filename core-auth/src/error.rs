use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// No OAuth app configuration was supplied; authentication is unavailable.
    #[error("OAuth client configuration has not been set")]
    ConfigurationMissing,

    #[error("Client is not authenticated")]
    NotAuthenticated,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("OAuth service discovery failed: {0}")]
    OAuthDiscoveryFailed(String),

    #[error("OAuth authentication failed: {0}")]
    OAuthAuthenticationFailed(String),

    #[error("Another login is already in progress")]
    LoginInProgress,

    #[error("OAuth state mismatch in authorization callback")]
    StateMismatch,

    #[error("Session persistence failed: {0}")]
    Persistence(String),

    #[error("Session could not be serialized: {0}")]
    SerializationFailed(String),

    #[error("Network error: {0}")]
    Network(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
