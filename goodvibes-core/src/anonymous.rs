//! Anonymous, app-scoped credentials for browse-only access.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::AuthBackend;
use crate::model::Credential;

/// Obtaining an anonymous credential failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    /// Application secrets are not configured on the issuing side.
    #[error("client credentials not configured: {message}")]
    Config { message: String },

    /// The issuer refused the request.
    #[error("client credentials rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("client credentials endpoint unreachable: {message}")]
    Unreachable { message: String },

    #[error("malformed client credentials response: {message}")]
    MalformedResponse { message: String },
}

impl CredentialsError {
    /// Whether this failure needs operator action rather than a retry.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CredentialsError::Config { .. })
    }
}

/// Fetches and caches the anonymous credential.
///
/// The cache lives in memory only. Concurrent callers share a single
/// in-flight request.
#[derive(Clone)]
pub struct ClientCredentialsService {
    backend: Arc<dyn AuthBackend>,
    cached: Arc<Mutex<Option<Credential>>>,
}

impl ClientCredentialsService {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Return the cached credential while it has lifetime left, otherwise
    /// request a new one.
    pub async fn get_anonymous_token(&self) -> Result<Credential, CredentialsError> {
        let mut cached = self.cached.lock().await;

        if let Some(credential) = cached.as_ref() {
            if credential.is_live_at(Utc::now()) {
                tracing::debug!("Using cached anonymous token");
                return Ok(credential.clone());
            }
        }

        let grant = match self.backend.anonymous_token().await {
            Ok(grant) => grant,
            Err(e) => {
                if e.is_configuration() {
                    tracing::error!("Anonymous token unavailable, configuration error: {}", e);
                } else {
                    tracing::warn!("Anonymous token request failed: {}", e);
                }
                return Err(e);
            }
        };

        let credential = Credential {
            access_token: grant.access_token.clone(),
            refresh_token: None,
            expires_at: Some(grant.expires_at(Utc::now())),
        };
        tracing::info!("Obtained anonymous token ({}s)", grant.expires_in);

        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Drop the cached credential.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

impl std::fmt::Debug for ClientCredentialsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use crate::model::{TokenGrant, UserTokens};
    use crate::refresh::RefreshError;
    use crate::store::Secret;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AnonBackend {
        calls: AtomicUsize,
        expires_in: u64,
        result: Option<CredentialsError>,
    }

    impl AnonBackend {
        fn issuing(expires_in: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expires_in,
                result: None,
            })
        }

        fn failing(err: CredentialsError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expires_in: 0,
                result: Some(err),
            })
        }
    }

    #[async_trait]
    impl AuthBackend for AnonBackend {
        async fn refresh(&self, _refresh_token: &Secret) -> Result<TokenGrant, RefreshError> {
            unreachable!("not used by anonymous tests")
        }

        async fn anonymous_token(&self) -> Result<TokenGrant, CredentialsError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match &self.result {
                Some(err) => Err(err.clone()),
                None => Ok(TokenGrant::new(format!("anon-{}", n), self.expires_in)),
            }
        }

        async fn fetch_handoff(&self) -> Result<UserTokens, HandshakeError> {
            unreachable!("not used by anonymous tests")
        }
    }

    #[tokio::test]
    async fn test_cached_within_lifetime() {
        let backend = AnonBackend::issuing(3600);
        let service = ClientCredentialsService::new(backend.clone());

        let first = service.get_anonymous_token().await.unwrap();
        let second = service.get_anonymous_token().await.unwrap();

        assert_eq!(first, second);
        assert!(!first.can_refresh());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced() {
        // Zero lifetime: expired the moment it is issued.
        let backend = AnonBackend::issuing(0);
        let service = ClientCredentialsService::new(backend.clone());

        let first = service.get_anonymous_token().await.unwrap();
        let second = service.get_anonymous_token().await.unwrap();

        assert_ne!(first.access_token, second.access_token);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_request() {
        let backend = AnonBackend::issuing(3600);
        let service = ClientCredentialsService::new(backend.clone());

        service.get_anonymous_token().await.unwrap();
        service.invalidate().await;
        service.get_anonymous_token().await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_configuration_failure_is_distinguished() {
        let backend = AnonBackend::failing(CredentialsError::Config {
            message: "Missing provider credentials".into(),
        });
        let service = ClientCredentialsService::new(backend);

        let err = service.get_anonymous_token().await.unwrap_err();
        assert!(err.is_configuration());

        let rejected = CredentialsError::Rejected {
            status: 401,
            message: "invalid_client".into(),
        };
        assert!(!rejected.is_configuration());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_request() {
        let backend = AnonBackend::issuing(3600);
        let service = ClientCredentialsService::new(backend.clone());

        let (a, b) = tokio::join!(service.get_anonymous_token(), service.get_anonymous_token());

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
