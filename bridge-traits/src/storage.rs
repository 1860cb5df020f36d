//! Secure Storage Abstraction
//!
//! The authentication layer persists exactly one serialized session blob. Where
//! that blob physically lives is a host concern, hidden behind [`SecureStore`].

use async_trait::async_trait;

use crate::error::Result;

/// Key/value store for small secrets, encrypted at rest by the platform.
///
/// Expected backends are the iOS/macOS Keychain, the Android Keystore, the
/// Windows Credential Manager and the Secret Service on Linux. Values hold
/// refresh tokens, so implementations must not log them.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn forget_session(store: &dyn SecureStore) -> Result<()> {
///     if store.has_secret("quran.auth.session").await? {
///         store.delete_secret("quran.auth.session").await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Writes `value` under `key`, replacing what was there.
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Reads the value under `key`; `Ok(None)` when nothing is stored.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removes `key`. Removing a missing key succeeds.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}
