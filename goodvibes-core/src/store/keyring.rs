//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// OS keyring-backed secret store.
///
/// Uses the platform's native keyring service (Keychain, Secret Service,
/// Credential Manager). Each key becomes an entry whose service is
/// `{service_name}/{key}`.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let probe = format!("{}/__probe__", service_name);
        match Entry::new(&probe, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key);
        Entry::new(&service, "goodvibes").map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error for {}: {}", key, e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Platform keyrings have no enumeration API.
        Err(StoreError::BackendError {
            message: format!(
                "list_keys not supported by keyring backend (requested prefix: {})",
                prefix
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("goodvibes-test") {
            Ok(store) => assert_eq!(store.service_name, "goodvibes-test"),
            Err(StoreError::KeyringUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_list_keys_unsupported() {
        let store = match KeyringStore::try_new("goodvibes-test-list") {
            Ok(s) => s,
            Err(_) => return,
        };

        let result = store.list_keys("handoff/").await;
        assert!(matches!(result, Err(StoreError::BackendError { .. })));
    }
}
