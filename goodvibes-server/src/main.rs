//! Good Vibes Server
//!
//! Runs the OAuth handshake and token endpoints the client talks to.
//!
//! # Running
//!
//! ```bash
//! SPOTIFY_CLIENT_ID=... SPOTIFY_CLIENT_SECRET=... cargo run -p goodvibes-server
//! ```

use anyhow::Result;
use goodvibes_server::{ServerConfig, build_state, config, start_server};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    init_logging(&config.log_level);

    info!("Loaded configuration from {:?}", config.config_path);

    run_server(config).await
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn run_server(config: ServerConfig) -> Result<()> {
    if !config.credentials().is_complete() {
        warn!(
            "{} / {} not set; token endpoints will report a configuration error",
            config::CLIENT_ID_ENV,
            config::CLIENT_SECRET_ENV
        );
    }

    let state = build_state(&config)?;
    let server_handle = start_server(config.bind_addr, state).await?;

    info!("Server running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");

    server_handle.stop().await?;

    info!("Server stopped");
    Ok(())
}
