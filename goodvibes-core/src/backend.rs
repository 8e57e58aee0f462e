//! Client-side access to the token endpoints.
//!
//! [`AuthBackend`] is the seam between the session and whatever issues
//! tokens. [`HttpAuthBackend`] talks to the handshake server's endpoints:
//!
//! - `POST /token-refresh` with `{"refreshToken": ...}`
//! - `GET /anonymous-token`
//! - `GET /token-handoff`

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::anonymous::CredentialsError;
use crate::error::HandshakeError;
use crate::model::{TokenGrant, UserTokens};
use crate::refresh::RefreshError;
use crate::store::Secret;

/// Issues access credentials on behalf of the session.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, RefreshError>;

    /// Obtain an application-scoped token with no user identity.
    async fn anonymous_token(&self) -> Result<TokenGrant, CredentialsError>;

    /// Read the token pair staged by the handshake. Succeeds at most once per
    /// handshake.
    async fn fetch_handoff(&self) -> Result<UserTokens, HandshakeError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Failure to set up an [`HttpAuthBackend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`AuthBackend`] over HTTP.
///
/// The underlying client keeps cookies so that the hand-off cookie set by the
/// handshake callback is presented back to `/token-handoff`.
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpAuthBackend {
    /// Create a backend rooted at `base_url` (e.g. `http://localhost:3000`).
    ///
    /// Endpoints resolve below the base path, so `http://host/app` serves
    /// refreshes from `http://host/app/token-refresh`.
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Self::with_client(base_url, client)
    }

    /// Create a backend with a caller-supplied HTTP client.
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self, BackendError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Url {
        endpoint_url(&self.base_url, path)
    }
}

/// Append `path` to the path of `base`, keeping any prefix `base` carries.
pub fn endpoint_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{}{}", prefix, path));
    url.set_query(None);
    url.set_fragment(None);
    url
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| if body.is_empty() { status.to_string() } else { body }),
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, RefreshError> {
        let url = self.endpoint("/token-refresh");

        let response = self
            .client
            .post(url)
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Unreachable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| RefreshError::MalformedResponse {
                message: e.to_string(),
            })
    }

    async fn anonymous_token(&self) -> Result<TokenGrant, CredentialsError> {
        let url = self.endpoint("/anonymous-token");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CredentialsError::Unreachable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            return Err(CredentialsError::Config {
                message: error_message(response).await,
            });
        }
        if !status.is_success() {
            return Err(CredentialsError::Rejected {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| CredentialsError::MalformedResponse {
                message: e.to_string(),
            })
    }

    async fn fetch_handoff(&self) -> Result<UserTokens, HandshakeError> {
        let url = self.endpoint("/token-handoff");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HandshakeError::Transport {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(HandshakeError::NoHandoff),
            status if status.is_success() => response
                .json::<UserTokens>()
                .await
                .map_err(|e| HandshakeError::Transport {
                    message: e.to_string(),
                }),
            _ => Err(HandshakeError::Transport {
                message: error_message(response).await,
            }),
        }
    }
}
