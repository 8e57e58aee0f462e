//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`MemoryStore`] - In-memory implementation for tests and ephemeral sessions
//! - [`FileStore`] - JSON file implementation that survives restarts
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select backend based on availability
//!
//! The durable user credential lives under [`USER_TOKENS_KEY`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// Key of the serialized user credential pair.
pub const USER_TOKENS_KEY: &str = "authTokens";

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the wrapped value is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error reading or writing a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys matching a prefix.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list_keys(prefix).await
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list_keys(prefix).await
    }
}

/// Create a secret store with automatic backend selection.
///
/// - If `prefer_keyring` is set and the `keyring-store` feature is enabled,
///   the OS keyring is tried first.
/// - Otherwise, or if the keyring is unavailable, a [`FileStore`] at
///   `file_path` is used when one is given.
/// - As a last resort secrets live in a [`MemoryStore`] and are lost on exit.
pub fn create_store(prefer_keyring: bool, file_path: Option<PathBuf>) -> Box<dyn SecretStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new("goodvibes") {
            Ok(store) => {
                tracing::info!("Using OS keyring for token storage");
                return Box::new(store);
            }
            Err(e) => {
                tracing::warn!("Keyring unavailable ({}), falling back", e);
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!("Keyring storage requested but keyring-store feature not enabled");
    }

    if let Some(path) = file_path {
        match FileStore::open(path.clone()) {
            Ok(store) => {
                tracing::info!("Using file token storage at {:?}", path);
                return Box::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "File store at {:?} unusable ({}), tokens will not survive restarts",
                    path,
                    e
                );
            }
        }
    }

    tracing::debug!("Using in-memory token storage");
    Box::new(MemoryStore::new())
}
