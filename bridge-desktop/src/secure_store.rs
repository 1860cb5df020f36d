//! Secure session storage using the OS keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, error};

/// Keychain service name the session blob is filed under.
pub const DEFAULT_SERVICE_NAME: &str = "quran-data-layer";

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// Keyring entries hold strings, so values are stored base64 encoded.
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(map_keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

fn map_keyring_error(e: keyring::Error) -> BridgeError {
    BridgeError::OperationFailed(format!("Keyring error: {}", e))
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = STANDARD.encode(value);
        self.entry(key)?
            .set_password(&encoded)
            .map_err(map_keyring_error)?;

        debug!(key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    error!(key, error = %e, "Failed to decode secret");
                    BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
                })?;
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key, "Secret not found in keyring");
                Ok(None)
            }
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                debug!(key, "Deleted secret from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    async fn has_secret(&self, key: &str) -> Result<bool> {
        match self.entry(key)?.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let store = KeyringSecureStore::default();
        assert_eq!(store.service_name(), DEFAULT_SERVICE_NAME);

        let store = KeyringSecureStore::with_service_name("quran-tests");
        assert_eq!(store.service_name(), "quran-tests");
    }

    #[tokio::test]
    async fn test_set_get_delete_round_trip() {
        // Headless CI machines usually have no keychain; skip when unavailable.
        let store = KeyringSecureStore::with_service_name("quran-data-layer-tests");
        let key = "session-roundtrip";
        let value = br#"{"version":1,"state":null}"#;

        let _ = store.delete_secret(key).await;
        if let Err(e) = store.set_secret(key, value).await {
            println!("Keyring not available ({}), skipping test", e);
            return;
        }

        match store.get_secret(key).await {
            Ok(Some(retrieved)) => assert_eq!(retrieved, value.to_vec()),
            other => println!("Keyring did not return the stored secret: {:?}", other),
        }

        store.delete_secret(key).await.unwrap();
        // Deleting twice is not an error.
        store.delete_secret(key).await.unwrap();
    }
}
