//! Good Vibes Server Library
//!
//! This library exposes the server's API and configuration for testing
//! and potential embedding in other applications.

pub mod api;
pub mod config;
pub mod handoff;

pub use api::{ApiState, ServerHandle, make_router, start_server};
pub use config::{ServerConfig, load_config, load_config_from};
pub use handoff::HandoffRegistry;

use anyhow::{Context, Result};
use goodvibes_core::{HandshakeCoordinator, ProviderClient};

/// Build the handler state described by `config`.
pub fn build_state(config: &ServerConfig) -> Result<ApiState> {
    let base_url = url::Url::parse(&config.base_url)
        .with_context(|| format!("Invalid base_url {:?}", config.base_url))?;

    let provider = ProviderClient::new(
        config.provider.clone(),
        config.credentials(),
        config.redirect_uri(),
    );

    Ok(ApiState::new(HandshakeCoordinator::new(provider), base_url))
}
