//! Request and response bodies of the HTTP endpoints.

use goodvibes_core::{TokenGrant, UserTokens};
use serde::{Deserialize, Serialize};

/// Body of `POST /token-refresh`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
}

/// Access token as returned by `/token-refresh` and `/anonymous-token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: String,
}

impl From<TokenGrant> for AccessTokenResponse {
    fn from(grant: TokenGrant) -> Self {
        Self {
            access_token: grant.access_token.expose().to_string(),
            expires_in: grant.expires_in,
            token_type: grant.token_type.clone(),
        }
    }
}

/// Body of `GET /token-handoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl From<UserTokens> for HandoffResponse {
    fn from(tokens: UserTokens) -> Self {
        Self {
            access_token: tokens.access_token.map(|s| s.expose().to_string()),
            refresh_token: tokens.refresh_token.map(|s| s.expose().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
