//! Server configuration handling.
//!
//! Settings come from `server.toml` in the platform config directory; the
//! application secrets come from the environment only.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use goodvibes_core::{AppCredentials, ProviderConfig, Secret};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable holding the provider client id.
pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";

/// Environment variable holding the provider client secret.
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,

    /// Public URL of the application. Redirects after the handshake go here,
    /// and the provider redirect URI is derived from it.
    pub base_url: String,

    /// Overrides the derived `{base_url}/oauth-callback` redirect URI.
    pub redirect_uri: Option<String>,

    /// Provider endpoints and scopes.
    pub provider: ProviderConfig,

    /// Logging level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            base_url: "http://localhost:3000".to_string(),
            redirect_uri: None,
            provider: ProviderConfig::spotify(),
            log_level: "info".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl ServerConfig {
    /// Redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        self.redirect_uri.clone().unwrap_or_else(|| {
            format!("{}/oauth-callback", self.base_url.trim_end_matches('/'))
        })
    }

    /// Application secrets from the environment.
    ///
    /// Missing values are not an error here; requests that need them fail
    /// with a configuration error instead.
    pub fn credentials(&self) -> AppCredentials {
        AppCredentials {
            client_id: env_secret(CLIENT_ID_ENV),
            client_secret: env_secret(CLIENT_SECRET_ENV),
        }
    }
}

fn env_secret(name: &str) -> Option<Secret> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}

/// Load configuration from the default location or create defaults.
pub fn load_config() -> Result<ServerConfig> {
    let config_path = project_dirs()
        .map(|d| d.config_dir().join("server.toml"))
        .unwrap_or_else(|| PathBuf::from("goodvibes-server.toml"));

    load_config_from(&config_path)
}

/// Load configuration from `path`, falling back to defaults when it does not
/// exist.
pub fn load_config_from(path: &Path) -> Result<ServerConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?
    } else {
        ServerConfig::default()
    };

    config.config_path = path.to_path_buf();
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "good-vibes", "goodvibes")
}
