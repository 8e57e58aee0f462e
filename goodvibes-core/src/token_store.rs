//! Durable user-token persistence and the one-time hand-off side channel.
//!
//! The durable record is the serialized [`UserTokens`] pair under
//! [`USER_TOKENS_KEY`]. Hand-off artifacts are the tokens staged between
//! handshake completion and the session consuming them; they live under
//! `handoff/` and are read at most once.

use chrono::{DateTime, Utc};

use crate::model::UserTokens;
use crate::store::{Secret, SecretStore, StoreError, USER_TOKENS_KEY};

const HANDOFF_ACCESS_KEY: &str = "handoff/access_token";
const HANDOFF_REFRESH_KEY: &str = "handoff/refresh_token";
const HANDOFF_EXPIRY_KEY: &str = "handoff/token_expiry";

const HANDOFF_KEYS: [&str; 3] = [HANDOFF_ACCESS_KEY, HANDOFF_REFRESH_KEY, HANDOFF_EXPIRY_KEY];

/// Token persistence on top of a [`SecretStore`] backend.
pub struct TokenStore {
    store: Box<dyn SecretStore>,
}

impl TokenStore {
    pub fn new(store: Box<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Write the durable user credential, replacing any previous one.
    pub async fn persist_user_tokens(&self, tokens: &UserTokens) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(tokens)?;
        self.store
            .set(USER_TOKENS_KEY, &Secret::new(serialized))
            .await?;
        tracing::debug!("Persisted user tokens");
        Ok(())
    }

    /// Read the durable user credential.
    ///
    /// Backend failures and malformed records both come back as `None`.
    pub async fn load_user_tokens(&self) -> Option<UserTokens> {
        let raw = match self.store.get(USER_TOKENS_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Could not read stored user tokens: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<UserTokens>(raw.expose()) {
            Ok(tokens) if !tokens.is_empty() => Some(tokens),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Ignoring malformed stored user tokens: {}", e);
                None
            }
        }
    }

    /// Remove the durable record and every hand-off artifact.
    pub async fn clear_user_tokens(&self) -> Result<(), StoreError> {
        self.store.delete(USER_TOKENS_KEY).await?;
        self.clear_handoff().await
    }

    /// Stage a token pair for one-time pickup.
    pub async fn stage_handoff(
        &self,
        tokens: &UserTokens,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.clear_handoff().await?;

        if let Some(access) = &tokens.access_token {
            self.store.set(HANDOFF_ACCESS_KEY, access).await?;
        }
        if let Some(refresh) = &tokens.refresh_token {
            self.store.set(HANDOFF_REFRESH_KEY, refresh).await?;
        }
        if let Some(expires_at) = expires_at {
            let timestamp = Secret::new(expires_at.timestamp().to_string());
            self.store.set(HANDOFF_EXPIRY_KEY, &timestamp).await?;
        }
        Ok(())
    }

    /// Read and invalidate the staged hand-off.
    ///
    /// Returns `None` when nothing is staged or the staged pair has expired.
    /// The artifacts are removed either way.
    pub async fn take_handoff(&self) -> Option<UserTokens> {
        let read = async {
            let tokens = UserTokens {
                access_token: self.store.get(HANDOFF_ACCESS_KEY).await?,
                refresh_token: self.store.get(HANDOFF_REFRESH_KEY).await?,
            };
            let expiry = self.store.get(HANDOFF_EXPIRY_KEY).await?;
            Ok::<_, StoreError>((tokens, expiry))
        };

        let staged = read.await;
        if let Err(e) = self.clear_handoff().await {
            tracing::warn!("Could not invalidate hand-off artifacts: {}", e);
        }

        let (tokens, expiry) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!("Could not read hand-off artifacts: {}", e);
                return None;
            }
        };

        if tokens.is_empty() {
            return None;
        }

        let expired = expiry
            .and_then(|s| s.expose().parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .is_some_and(|exp| exp <= Utc::now());
        if expired {
            tracing::info!("Discarding expired hand-off");
            return None;
        }

        Some(tokens)
    }

    /// Remove the hand-off artifacts. Idempotent.
    pub async fn clear_handoff(&self) -> Result<(), StoreError> {
        for key in HANDOFF_KEYS {
            self.store.delete(key).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}
