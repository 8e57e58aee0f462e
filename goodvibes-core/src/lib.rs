//! # Good Vibes Core
//!
//! Session and credential handling for the Good Vibes playback client.
//!
//! This crate provides:
//! - The [`Session`] state machine reconciling user and anonymous credentials
//!   with a playback device
//! - Token refresh, client-credentials caching and device bootstrap services
//! - Durable token storage over pluggable [`SecretStore`] backends
//! - The provider-side OAuth handshake (with the `oauth` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use goodvibes_core::{HeadlessRuntime, HttpAuthBackend, Session, TokenStore, create_store};
//!
//! async fn start() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(HttpAuthBackend::new("http://localhost:3000")?);
//!     let store = TokenStore::new(create_store(true, None));
//!     let session = Session::builder(backend, Arc::new(HeadlessRuntime::new()), store).build();
//!
//!     let state = session.check_status().await;
//!     println!("session is {}", state);
//!     Ok(())
//! }
//! ```

pub mod anonymous;
pub mod backend;
pub mod device;
pub mod error;
pub mod model;
pub mod refresh;
pub mod session;
pub mod store;
pub mod token_store;

#[cfg(feature = "oauth")]
pub mod provider;

#[cfg(feature = "oauth")]
pub mod oauth;

// Re-export commonly used types at crate root
pub use model::{Credential, CredentialKind, TokenGrant, UserTokens};

pub use store::{
    FileStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreError,
    USER_TOKENS_KEY,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use error::{ConfigError, HandshakeError, SessionError};

pub use token_store::TokenStore;

pub use backend::{AuthBackend, BackendError, HttpAuthBackend, endpoint_url};

pub use refresh::{
    CredentialCell,
    REFRESH_INTERVAL,
    RefreshError,
    RefreshTimer,
    TokenRefreshService,
};

pub use anonymous::{ClientCredentialsService, CredentialsError};

pub use device::{
    AccessTokenSource,
    BootstrapError,
    DEFAULT_VOLUME,
    DEVICE_NAME,
    Device,
    DeviceBootstrapper,
    DeviceEvent,
    HeadlessRuntime,
    PlaybackRuntime,
    PlayerHandle,
    PlayerOptions,
};

pub use session::{LOGIN_PATH, Navigator, Session, SessionBuilder, SessionState};

#[cfg(feature = "oauth")]
pub use provider::ProviderConfig;

#[cfg(feature = "oauth")]
pub use oauth::{
    AppCredentials,
    CallbackParams,
    HandshakeCoordinator,
    ProviderClient,
    ProviderError,
};
