//! OAuth provider configuration.
//!
//! [`ProviderConfig::spotify`] is the provider this application talks to;
//! every field can be overridden (the server's config file does this to
//! point tests at a mock provider).

use serde::{Deserialize, Serialize};

/// Scopes requested for a user login.
pub const DEFAULT_SCOPES: [&str; 4] = [
    "user-read-private",
    "streaming",
    "user-read-playback-state",
    "user-modify-playback-state",
];

/// Lifetime assumed when the token endpoint does not report one.
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Endpoints and scopes of an OAuth provider.
///
/// # Example
///
/// ```
/// use goodvibes_core::provider::ProviderConfig;
///
/// let provider = ProviderConfig::spotify()
///     .with_token_url("http://127.0.0.1:9999/api/token");
/// assert_eq!(provider.scope_string(),
///     "user-read-private streaming user-read-playback-state user-modify-playback-state");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Unique identifier for the provider (e.g., "spotify").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// OAuth authorization endpoint URL.
    pub auth_url: String,

    /// OAuth token endpoint URL.
    pub token_url: String,

    /// Scopes requested at login.
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    pub fn spotify() -> Self {
        Self {
            id: "spotify".to_string(),
            name: "Spotify".to_string(),
            auth_url: "https://accounts.spotify.com/authorize".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Scopes as the space-separated `scope` parameter.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::spotify()
    }
}
