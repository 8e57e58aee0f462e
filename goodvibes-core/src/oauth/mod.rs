//! Provider-side OAuth 2.0.
//!
//! - [`ProviderClient`] - code, refresh and client-credentials exchanges
//! - [`HandshakeCoordinator`] - state issuance and callback validation
//!
//! # Features
//!
//! This module is only available when the `oauth` feature is enabled.

mod client;
mod handshake;

pub use client::{AppCredentials, ProviderClient, ProviderError};
pub use handshake::{
    CallbackParams, HandshakeCoordinator, LoginRedirect, PendingStates, STATE_LENGTH, STATE_TTL,
};

use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, TokenUrl, basic::BasicClient};

use crate::error::ConfigError;
use crate::provider::ProviderConfig;

/// Create an OAuth2 client from a provider configuration.
///
/// # Arguments
///
/// * `config` - Provider configuration
/// * `client_id` - OAuth client ID
/// * `client_secret` - Client secret; not needed to build authorization URLs
/// * `redirect_uri` - Redirect URI for the authorization code flow
pub fn create_oauth_client(
    config: &ProviderConfig,
    client_id: impl Into<String>,
    client_secret: Option<impl Into<String>>,
    redirect_uri: Option<impl Into<String>>,
) -> Result<BasicClient, ConfigError> {
    let auth_url = AuthUrl::new(config.auth_url.clone()).map_err(|e| ConfigError::Invalid {
        message: format!("invalid auth URL: {}", e),
    })?;

    let token_url = TokenUrl::new(config.token_url.clone()).map_err(|e| ConfigError::Invalid {
        message: format!("invalid token URL: {}", e),
    })?;

    let mut client = BasicClient::new(
        ClientId::new(client_id.into()),
        client_secret.map(|s| ClientSecret::new(s.into())),
        auth_url,
        Some(token_url),
    );

    if let Some(redirect) = redirect_uri {
        let redirect_url = RedirectUrl::new(redirect.into()).map_err(|e| ConfigError::Invalid {
            message: format!("invalid redirect URL: {}", e),
        })?;
        client = client.set_redirect_uri(redirect_url);
    }

    Ok(client)
}

/// Generate a random alphanumeric string of the specified length.
pub fn generate_random_string(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
