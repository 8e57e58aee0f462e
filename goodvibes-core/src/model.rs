//! Domain model types.
//!
//! - [`Credential`] - An access credential, with or without refresh capability
//! - [`UserTokens`] - The user token pair as persisted and handed off
//! - [`TokenGrant`] - A token endpoint response as it travels over the wire

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Secret;

/// Which of the two token lifecycles a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Issued for a logged-in user; refreshable and persisted.
    User,
    /// Issued to the application via client credentials; memory only.
    Anonymous,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::User => write!(f, "user"),
            CredentialKind::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// An access credential with optional refresh capability and expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    /// `None` when the issuer did not say.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A refreshable user credential.
    pub fn user(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Some(Secret::new(refresh_token)),
            expires_at: None,
        }
    }

    /// An anonymous credential that expires at `expires_at`.
    pub fn anonymous(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
            expires_at: Some(expires_at),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn kind(&self) -> CredentialKind {
        if self.refresh_token.is_some() {
            CredentialKind::User
        } else {
            CredentialKind::Anonymous
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Lifetime left at `now`. Credentials without an expiry report zero.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .map(|exp| exp - now)
            .unwrap_or_else(Duration::zero)
    }

    /// Whether the credential still has strictly positive lifetime at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now) > Duration::zero()
    }
}

/// The user token pair.
///
/// Serialized as `{"access_token": ..., "refresh_token": ...}` under the
/// durable storage key. Either half may be missing in data read back from
/// storage or received from a hand-off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokens {
    #[serde(default)]
    pub access_token: Option<Secret>,
    #[serde(default)]
    pub refresh_token: Option<Secret>,
}

impl UserTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(Secret::new(access_token)),
            refresh_token: Some(Secret::new(refresh_token)),
        }
    }

    /// Neither half present (or both empty strings).
    pub fn is_empty(&self) -> bool {
        !has_value(&self.access_token) && !has_value(&self.refresh_token)
    }

    /// Both halves present and non-empty.
    pub fn is_complete(&self) -> bool {
        has_value(&self.access_token) && has_value(&self.refresh_token)
    }

    /// The pair as a credential, if an access token is present.
    pub fn to_credential(&self) -> Option<Credential> {
        let access_token = self.access_token.clone().filter(|s| !s.is_empty())?;
        Some(Credential {
            access_token,
            refresh_token: self.refresh_token.clone().filter(|s| !s.is_empty()),
            expires_at: None,
        })
    }
}

fn has_value(secret: &Option<Secret>) -> bool {
    secret.as_ref().is_some_and(|s| !s.is_empty())
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint payload: `{access_token, expires_in, token_type}` plus the
/// optional fields a provider may add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: Secret,
    /// Lifetime in seconds from issuance.
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: Secret::new(access_token),
            expires_in,
            token_type: default_token_type(),
            refresh_token: None,
            scope: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Absolute expiry for a grant received at `issued_at`.
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.expires_in).unwrap_or(i64::MAX);
        issued_at
            .checked_add_signed(Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_kind() {
        assert_eq!(Credential::user("a", "r").kind(), CredentialKind::User);
        assert_eq!(
            Credential::anonymous("a", Utc::now()).kind(),
            CredentialKind::Anonymous
        );
    }

    #[test]
    fn test_credential_liveness_is_strict() {
        let now = Utc::now();
        let cred = Credential::anonymous("a", now);
        assert!(!cred.is_live_at(now));
        assert!(cred.is_live_at(now - Duration::seconds(1)));

        // No expiry means no known lifetime.
        assert!(!Credential::user("a", "r").is_live_at(now));
    }

    #[test]
    fn test_user_tokens_json_shape() {
        let tokens = UserTokens::new("access", "refresh");
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"access_token": "access", "refresh_token": "refresh"})
        );

        let partial: UserTokens =
            serde_json::from_str(r#"{"access_token": null, "refresh_token": "r"}"#).unwrap();
        assert!(!partial.is_complete());
        assert!(!partial.is_empty());
        assert!(partial.to_credential().is_none());
    }

    #[test]
    fn test_user_tokens_empty_strings_count_as_absent() {
        let tokens = UserTokens::new("", "");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_token_grant_defaults() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token": "a", "expires_in": 3600}"#).unwrap();
        assert_eq!(grant.token_type, "Bearer");

        let issued = Utc::now();
        assert_eq!(grant.expires_at(issued), issued + Duration::hours(1));
    }
}
