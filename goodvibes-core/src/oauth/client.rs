//! Token endpoint exchanges against the provider.

use oauth2::basic::{BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthorizationCode, CsrfToken, RefreshToken, RequestTokenError, Scope, TokenResponse,
};
use thiserror::Error;
use url::Url;

use super::create_oauth_client;
use crate::error::ConfigError;
use crate::model::TokenGrant;
use crate::provider::{DEFAULT_EXPIRES_IN, ProviderConfig};
use crate::store::Secret;

/// The application's client id and secret.
///
/// Either may be absent; operations that need a missing one fail with
/// [`ConfigError::MissingSecret`] when called, not at construction.
#[derive(Debug, Clone, Default)]
pub struct AppCredentials {
    pub client_id: Option<Secret>,
    pub client_secret: Option<Secret>,
}

impl AppCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(Secret::new(client_id)),
            client_secret: Some(Secret::new(client_secret)),
        }
    }

    pub fn client_id(&self) -> Result<&Secret, ConfigError> {
        self.client_id
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret { name: "client_id" })
    }

    pub fn client_secret(&self) -> Result<&Secret, ConfigError> {
        self.client_secret
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret {
                name: "client_secret",
            })
    }

    pub fn is_complete(&self) -> bool {
        self.client_id().is_ok() && self.client_secret().is_ok()
    }
}

/// A provider token-endpoint exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The provider answered with an OAuth error.
    #[error("provider rejected the request: {error}")]
    Rejected { status: u16, error: String },

    #[error("provider unreachable: {message}")]
    Transport { message: String },

    #[error("unexpected provider response: {message}")]
    Malformed { message: String },
}

impl ProviderError {
    /// HTTP status to report to our own callers.
    pub fn status(&self) -> u16 {
        match self {
            ProviderError::Config(_) => 500,
            ProviderError::Rejected { status, .. } => *status,
            ProviderError::Transport { .. } | ProviderError::Malformed { .. } => 502,
        }
    }

    fn from_request<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> Self
    where
        RE: std::error::Error + 'static,
    {
        match err {
            RequestTokenError::ServerResponse(response) => {
                let status = match response.error() {
                    BasicErrorResponseType::InvalidClient => 401,
                    _ => 400,
                };
                ProviderError::Rejected {
                    status,
                    error: response.error().to_string(),
                }
            }
            RequestTokenError::Request(e) => ProviderError::Transport {
                message: e.to_string(),
            },
            RequestTokenError::Parse(e, _) => ProviderError::Malformed {
                message: e.to_string(),
            },
            RequestTokenError::Other(message) => ProviderError::Malformed { message },
        }
    }
}

fn grant_from(response: &BasicTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: Secret::new(response.access_token().secret().clone()),
        expires_in: response
            .expires_in()
            .map(|d| d.as_secs())
            .unwrap_or(DEFAULT_EXPIRES_IN),
        token_type: "Bearer".to_string(),
        refresh_token: response
            .refresh_token()
            .map(|t| Secret::new(t.secret().clone())),
        scope: response.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }),
    }
}

/// Talks to the provider's authorize and token endpoints.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    credentials: AppCredentials,
    redirect_uri: String,
}

impl ProviderClient {
    pub fn new(
        config: ProviderConfig,
        credentials: AppCredentials,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            config,
            credentials,
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn credentials(&self) -> &AppCredentials {
        &self.credentials
    }

    /// The provider's authorization page for `state`.
    ///
    /// Needs only the client id.
    pub fn authorization_url(&self, state: &str) -> Result<Url, ConfigError> {
        let client = create_oauth_client(
            &self.config,
            self.credentials.client_id()?.expose(),
            None::<String>,
            Some(self.redirect_uri.as_str()),
        )?;

        let state = state.to_string();
        let (url, _) = client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new))
            .url();
        Ok(url)
    }

    /// Exchange an authorization code for a user token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        let response = self
            .confidential_client()?
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(ProviderError::from_request)?;

        tracing::info!("Exchanged authorization code for tokens");
        Ok(grant_from(&response))
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, ProviderError> {
        let response = self
            .confidential_client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(ProviderError::from_request)?;

        tracing::debug!("Provider refreshed access token");
        Ok(grant_from(&response))
    }

    /// Request an app-scoped token with the client-credentials grant.
    pub async fn client_credentials(&self) -> Result<TokenGrant, ProviderError> {
        let response = self
            .confidential_client()?
            .exchange_client_credentials()
            .request_async(async_http_client)
            .await
            .map_err(ProviderError::from_request)?;

        tracing::debug!("Provider issued client-credentials token");
        Ok(grant_from(&response))
    }

    fn confidential_client(&self) -> Result<oauth2::basic::BasicClient, ConfigError> {
        let client_id = self.credentials.client_id()?;
        let client_secret = self.credentials.client_secret()?;
        create_oauth_client(
            &self.config,
            client_id.expose(),
            Some(client_secret.expose()),
            Some(self.redirect_uri.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    fn provider(server: &MockServer, credentials: AppCredentials) -> ProviderClient {
        let config = ProviderConfig::spotify()
            .with_auth_url(format!("{}/authorize", server.uri()))
            .with_token_url(format!("{}/api/token", server.uri()));
        ProviderClient::new(config, credentials, "http://localhost:3000/oauth-callback")
    }

    #[test]
    fn test_authorization_url_parameters() {
        let client = ProviderClient::new(
            ProviderConfig::spotify(),
            AppCredentials {
                client_id: Some(Secret::new("cid")),
                client_secret: None,
            },
            "http://localhost:3000/oauth-callback",
        );

        let url = client.authorization_url("abc").unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["state"], "abc");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/oauth-callback");
        assert_eq!(
            params["scope"],
            "user-read-private streaming user-read-playback-state user-modify-playback-state"
        );
    }

    #[test]
    fn test_authorization_url_needs_client_id() {
        let client = ProviderClient::new(
            ProviderConfig::spotify(),
            AppCredentials::default(),
            "http://localhost:3000/oauth-callback",
        );

        assert_eq!(
            client.authorization_url("abc").unwrap_err(),
            ConfigError::MissingSecret { name: "client_id" }
        );
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "user-access",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "user-refresh",
                "scope": "user-read-private streaming"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = provider(&server, AppCredentials::new("cid", "secret"));
        let grant = client.exchange_code("the-code").await.unwrap();

        assert_eq!(grant.access_token.expose(), "user-access");
        assert_eq!(grant.refresh_token.unwrap().expose(), "user-refresh");
        assert_eq!(grant.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_missing_secret_is_config_error() {
        let server = MockServer::start().await;
        let client = provider(
            &server,
            AppCredentials {
                client_id: Some(Secret::new("cid")),
                client_secret: None,
            },
        );

        let err = client.client_credentials().await.unwrap_err();

        assert_eq!(
            err,
            ProviderError::Config(ConfigError::MissingSecret {
                name: "client_secret"
            })
        );
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn test_invalid_grant_is_rejected_with_400() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid refresh token"
            })))
            .mount(&server)
            .await;

        let client = provider(&server, AppCredentials::new("cid", "secret"));
        let err = client.refresh(&Secret::new("stale")).await.unwrap_err();

        assert_eq!(err.status(), 400);
        assert!(matches!(err, ProviderError::Rejected { ref error, .. } if error == "invalid_grant"));
    }

    #[tokio::test]
    async fn test_client_credentials_without_expiry_uses_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "anon",
                "token_type": "bearer"
            })))
            .mount(&server)
            .await;

        let client = provider(&server, AppCredentials::new("cid", "secret"));
        let grant = client.client_credentials().await.unwrap();

        assert_eq!(grant.access_token.expose(), "anon");
        assert_eq!(grant.expires_in, DEFAULT_EXPIRES_IN);
        assert!(grant.refresh_token.is_none());
    }
}
