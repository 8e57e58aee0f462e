//! Error types shared across the crate and the session-level error.

use thiserror::Error;

use crate::anonymous::CredentialsError;
use crate::device::BootstrapError;
use crate::refresh::RefreshError;
use crate::store::StoreError;

/// Application-level configuration is missing or invalid.
///
/// Not recoverable without operator action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An application secret (client id or client secret) is not set.
    #[error("missing application secret: {name}")]
    MissingSecret { name: &'static str },

    /// A configured value could not be used.
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// The OAuth handshake could not be completed.
///
/// Recoverable by restarting the login.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The provider redirected back with an `error` parameter.
    #[error("provider signaled error: {error}")]
    ProviderDenied { error: String },

    /// The returned state does not match the one issued, or none was issued.
    #[error("state mismatch")]
    StateMismatch,

    /// The callback carried no authorization code.
    #[error("no authorization code in callback")]
    NoCode,

    /// Secrets needed for the code exchange are missing.
    #[error("server configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The provider's token endpoint refused or failed the exchange.
    #[error("token exchange failed: {message}")]
    TokenExchange { message: String },

    /// No staged hand-off was available to read.
    #[error("no tokens staged for hand-off")]
    NoHandoff,

    /// The hand-off contained an incomplete token pair.
    #[error("incomplete tokens in hand-off")]
    IncompleteHandoff,

    /// The hand-off endpoint could not be reached or answered unexpectedly.
    #[error("hand-off transport failed: {message}")]
    Transport { message: String },
}

impl HandshakeError {
    /// Reason code carried in the `error` query parameter of the redirect.
    pub fn reason(&self) -> &str {
        match self {
            HandshakeError::ProviderDenied { error } => error,
            HandshakeError::StateMismatch => "state_mismatch",
            HandshakeError::NoCode => "no_code",
            HandshakeError::Config(_) => "server_config_error",
            HandshakeError::TokenExchange { .. } => "provider_token_error",
            HandshakeError::NoHandoff
            | HandshakeError::IncompleteHandoff
            | HandshakeError::Transport { .. } => "server_error",
        }
    }
}

/// Top-level error for session operations.
///
/// The session converts every one of these into a state transition before
/// returning it; callers only need it for reporting.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("anonymous credentials failed: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("device bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("token storage failed: {0}")]
    Store(#[from] StoreError),

    /// Neither an access token nor a refresh token was supplied.
    #[error("no tokens found")]
    NoTokens,

    /// The anonymous fallback already ran during this session check.
    #[error("anonymous fallback already attempted in this session check")]
    FallbackAlreadyAttempted,

    /// The session moved on (logout or a newer login) while this operation ran.
    #[error("session changed while the operation was in flight")]
    Superseded,
}

impl SessionError {
    /// Whether the failure means the credential itself is unusable.
    ///
    /// Storage trouble and cancelled work say nothing about the credential.
    pub fn rejects_credential(&self) -> bool {
        match self {
            SessionError::Refresh(_) => true,
            SessionError::Bootstrap(BootstrapError::Cancelled) => false,
            SessionError::Bootstrap(_) => true,
            _ => false,
        }
    }
}
