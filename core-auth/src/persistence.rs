//! Session persistence
//!
//! The client persists at most one session. [`SecureStorePersistence`] keeps
//! it as a single blob in the host's secure store (Keychain, Keystore, OS
//! credential manager), under one key.
//!
//! ## Security
//!
//! - Session bytes are never logged
//! - A blob that no longer decodes is deleted so the next launch starts clean

use crate::error::{AuthError, Result};
use crate::session::{AuthenticationData, SessionRestorer};
use async_trait::async_trait;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable storage of zero-or-one session.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Replaces the stored session.
    async fn persist(&self, session: &dyn AuthenticationData) -> Result<()>;

    /// Loads the stored session, if any.
    async fn retrieve(&self) -> Result<Option<Arc<dyn AuthenticationData>>>;

    /// Removes the stored session. Succeeds when nothing is stored.
    async fn clear(&self) -> Result<()>;
}

/// [`Persistence`] backed by a [`SecureStore`].
pub struct SecureStorePersistence {
    secure_store: Arc<dyn SecureStore>,
    restorer: Arc<dyn SessionRestorer>,
    key: String,
}

impl SecureStorePersistence {
    pub fn new(
        secure_store: Arc<dyn SecureStore>,
        restorer: Arc<dyn SessionRestorer>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            secure_store,
            restorer,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Persistence for SecureStorePersistence {
    async fn persist(&self, session: &dyn AuthenticationData) -> Result<()> {
        let bytes = session.encode()?;
        self.secure_store
            .set_secret(&self.key, &bytes)
            .await
            .map_err(|e| AuthError::Persistence(e.to_string()))?;

        debug!(key = %self.key, "Persisted authentication session");
        Ok(())
    }

    async fn retrieve(&self) -> Result<Option<Arc<dyn AuthenticationData>>> {
        let Some(bytes) = self
            .secure_store
            .get_secret(&self.key)
            .await
            .map_err(|e| AuthError::Persistence(e.to_string()))?
        else {
            debug!(key = %self.key, "No persisted authentication session");
            return Ok(None);
        };

        match self.restorer.restore(&bytes) {
            Ok(session) => Ok(Some(session)),
            Err(e @ AuthError::SerializationFailed(_)) => {
                warn!(key = %self.key, error = %e, "Discarding undecodable authentication session");
                if let Err(delete_error) = self.secure_store.delete_secret(&self.key).await {
                    warn!(error = %delete_error, "Failed to delete undecodable session");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.secure_store
            .delete_secret(&self.key)
            .await
            .map_err(|e| AuthError::Persistence(e.to_string()))?;

        info!(key = %self.key, "Cleared persisted authentication session");
        Ok(())
    }
}
