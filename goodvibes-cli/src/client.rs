//! Session wiring for the command line.
//!
//! Builds a [`Session`] that talks to the Good Vibes server over HTTP, keeps
//! tokens in the OS keyring or a JSON file, and plays on a headless device.

use anyhow::{Context, Result};
use goodvibes_core::{
    AuthBackend, ClientCredentialsService, FileStore, HeadlessRuntime, HttpAuthBackend, Navigator,
    SecretStore, Session, TokenStore, create_store, endpoint_url,
};
use reqwest::cookie::Jar;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Where tokens are kept between runs.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Token file to use instead of the default location.
    pub file: Option<PathBuf>,
    /// Skip the OS keyring.
    pub no_keyring: bool,
}

impl StoreOptions {
    /// Open the configured backend.
    pub fn open(&self) -> Arc<dyn SecretStore> {
        let file = self.file.clone().or_else(|| FileStore::default_path().ok());
        Arc::from(create_store(!self.no_keyring, file))
    }
}

/// Prints the page the session wants to show instead of opening it.
struct PrintNavigator {
    server: Url,
}

impl Navigator for PrintNavigator {
    fn navigate(&self, path: &str) {
        println!("-> {}", endpoint_url(&self.server, path));
    }
}

/// Connection settings shared by every command.
pub struct Client {
    server: Url,
    backend: Arc<HttpAuthBackend>,
}

impl Client {
    /// Connect to `server`.
    ///
    /// `handoff_id` is the value of the hand-off cookie set by the server's
    /// OAuth callback, for picking up tokens from a browser login.
    pub fn new(server: &str, handoff_id: Option<&str>) -> Result<Self> {
        let server = Url::parse(server).with_context(|| format!("Invalid server URL {:?}", server))?;

        let jar = Arc::new(Jar::default());
        if let Some(id) = handoff_id {
            debug!("Presenting hand-off cookie to {}", server);
            jar.add_cookie_str(&format!("handoff_id={}", id), &server);
        }
        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .build()
            .context("Failed to build HTTP client")?;

        let backend = HttpAuthBackend::with_client(server.as_str(), http)?;

        Ok(Self {
            server,
            backend: Arc::new(backend),
        })
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    /// Page that starts the browser login.
    pub fn login_url(&self) -> Url {
        endpoint_url(&self.server, "/login-start")
    }

    pub fn backend(&self) -> Arc<dyn AuthBackend> {
        self.backend.clone()
    }

    /// Client-credentials service backed by the server.
    pub fn anonymous(&self) -> ClientCredentialsService {
        ClientCredentialsService::new(self.backend())
    }

    /// Build a session keeping its tokens in `secrets`.
    pub fn session(&self, secrets: Arc<dyn SecretStore>) -> Session {
        let store = TokenStore::new(Box::new(secrets));

        Session::builder(self.backend(), Arc::new(HeadlessRuntime::new()), store)
            .navigator(Arc::new(PrintNavigator {
                server: self.server.clone(),
            }))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url() {
        let client = Client::new("http://localhost:3000", None).unwrap();
        assert_eq!(
            client.login_url().as_str(),
            "http://localhost:3000/login-start"
        );
    }

    #[test]
    fn test_login_url_keeps_server_path() {
        let client = Client::new("http://example.test/app/", None).unwrap();
        assert_eq!(
            client.login_url().as_str(),
            "http://example.test/app/login-start"
        );
    }

    #[test]
    fn test_invalid_server_url() {
        assert!(Client::new("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_store_file_option() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            file: Some(dir.path().join("tokens.json")),
            no_keyring: true,
        };

        let secrets = options.open();
        secrets.set("k", &goodvibes_core::Secret::new("v")).await.unwrap();

        let reopened = options.open();
        assert_eq!(reopened.get("k").await.unwrap().unwrap().expose(), "v");
    }
}
