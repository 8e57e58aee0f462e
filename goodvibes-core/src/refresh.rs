//! User-token refresh: one-shot, on demand, and on a fixed cadence.
//!
//! - [`TokenRefreshService`] - exchanges a refresh token for a new access token
//! - [`CredentialCell`] - the credential a device generation reads from
//! - [`RefreshTimer`] - the recurring refresh bound to one device generation

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::backend::AuthBackend;
use crate::device::AccessTokenSource;
use crate::model::Credential;
use crate::store::Secret;

/// Cadence of the recurring refresh.
///
/// Provider access tokens nominally live 60 minutes, so refreshing every 30
/// keeps a 2x margin.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// The refresh exchange failed.
///
/// Fatal to the current user session; callers log out instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The endpoint answered with a non-success status.
    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The endpoint could not be reached.
    #[error("refresh endpoint unreachable: {message}")]
    Unreachable { message: String },

    /// The endpoint answered with something that is not a token grant.
    #[error("malformed refresh response: {message}")]
    MalformedResponse { message: String },

    /// The credential has no refresh token to exchange.
    #[error("credential has no refresh capability")]
    NotRefreshable,
}

/// Exchanges refresh tokens for access tokens.
#[derive(Clone)]
pub struct TokenRefreshService {
    backend: Arc<dyn AuthBackend>,
}

impl TokenRefreshService {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self { backend }
    }

    /// Obtain a new access token.
    ///
    /// The returned credential carries the same refresh token that was
    /// passed in, even if the provider rotated it.
    pub async fn refresh(&self, refresh_token: &Secret) -> Result<Credential, RefreshError> {
        let grant = self.backend.refresh(refresh_token).await?;
        let expires_at = grant.expires_at(Utc::now());

        tracing::info!("Refreshed user access token");

        Ok(Credential {
            access_token: grant.access_token.clone(),
            refresh_token: Some(refresh_token.clone()),
            expires_at: Some(expires_at),
        })
    }

    /// Refresh the credential held in `cell` and store the result back.
    pub async fn refresh_cell(&self, cell: &CredentialCell) -> Result<Credential, RefreshError> {
        let refresh_token = cell
            .get()
            .refresh_token
            .ok_or(RefreshError::NotRefreshable)?;
        let refreshed = self.refresh(&refresh_token).await?;
        cell.replace(refreshed.clone());
        Ok(refreshed)
    }
}

impl std::fmt::Debug for TokenRefreshService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshService").finish_non_exhaustive()
    }
}

/// Shared, swappable credential for one device generation.
///
/// The device's token callback and the recurring refresh both read and
/// update the same cell, so the device keeps streaming with whatever token
/// was fetched last.
#[derive(Debug, Clone)]
pub struct CredentialCell(Arc<RwLock<Credential>>);

impl CredentialCell {
    pub fn new(credential: Credential) -> Self {
        Self(Arc::new(RwLock::new(credential)))
    }

    pub fn get(&self) -> Credential {
        self.0.read().clone()
    }

    pub fn access_token(&self) -> Secret {
        self.0.read().access_token.clone()
    }

    pub fn can_refresh(&self) -> bool {
        self.0.read().can_refresh()
    }

    pub fn replace(&self, credential: Credential) {
        *self.0.write() = credential;
    }
}

/// Token callback for refresh-capable credentials: every request refreshes.
pub struct RefreshingTokenSource {
    service: TokenRefreshService,
    cell: CredentialCell,
}

impl RefreshingTokenSource {
    pub fn new(service: TokenRefreshService, cell: CredentialCell) -> Self {
        Self { service, cell }
    }
}

#[async_trait]
impl AccessTokenSource for RefreshingTokenSource {
    async fn access_token(&self) -> Result<Secret, RefreshError> {
        let refreshed = self.service.refresh_cell(&self.cell).await?;
        Ok(refreshed.access_token)
    }
}

/// Token callback for credentials without refresh capability.
pub struct StaticTokenSource {
    cell: CredentialCell,
}

impl StaticTokenSource {
    pub fn new(cell: CredentialCell) -> Self {
        Self { cell }
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<Secret, RefreshError> {
        Ok(self.cell.access_token())
    }
}

/// Recurring refresh task.
///
/// Cancelling is synchronous: once [`cancel`](Self::cancel) returns the task
/// will not start another refresh. Dropping the timer cancels it.
#[derive(Debug)]
pub struct RefreshTimer {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl RefreshTimer {
    /// Start refreshing `cell` every `interval`. The first refresh happens
    /// one full interval after spawning.
    ///
    /// On the first failure `on_failure` is called and the timer stops.
    pub fn spawn<F>(
        service: TokenRefreshService,
        cell: CredentialCell,
        interval: Duration,
        on_failure: F,
    ) -> Self
    where
        F: FnOnce(RefreshError) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                match service.refresh_cell(&cell).await {
                    Ok(_) => tracing::debug!("Recurring refresh succeeded"),
                    Err(e) => {
                        tracing::error!("Recurring refresh failed: {}", e);
                        on_failure(e);
                        break;
                    }
                }
            }
        });

        tracing::debug!("Recurring refresh scheduled every {:?}", interval);
        Self { handle, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
