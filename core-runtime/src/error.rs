use thiserror::Error;

/// Errors raised while assembling the runtime (configuration, logging).
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required bridge was neither injected nor available as a desktop default.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn capability_missing(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CapabilityMissing {
            capability: capability.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
