//! The authorization-code handshake: issue a state, send the user to the
//! provider, validate what comes back and exchange the code.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

use super::client::{ProviderClient, ProviderError};
use super::generate_random_string;
use crate::error::HandshakeError;
use crate::model::TokenGrant;

/// Length of the opaque state value.
pub const STATE_LENGTH: usize = 50;

/// How long an issued state stays valid.
pub const STATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Issued states awaiting their callback. Each is accepted at most once.
#[derive(Debug)]
pub struct PendingStates {
    ttl: Duration,
    states: Mutex<HashMap<String, Instant>>,
}

impl PendingStates {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self) -> String {
        let state = generate_random_string(STATE_LENGTH);
        let mut states = self.states.lock();
        let ttl = self.ttl;
        states.retain(|_, issued| issued.elapsed() < ttl);
        states.insert(state.clone(), Instant::now());
        state
    }

    /// Remove `state`, returning whether it was issued and is still fresh.
    pub fn consume(&self, state: &str) -> bool {
        self.states
            .lock()
            .remove(state)
            .is_some_and(|issued| issued.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingStates {
    fn default() -> Self {
        Self::new(STATE_TTL)
    }
}

/// Query parameters of the provider's redirect back to us.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Where to send the browser to start a login, and the state to remember.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: Url,
    pub state: String,
}

/// Server-side OAuth code exchange.
#[derive(Debug)]
pub struct HandshakeCoordinator {
    provider: ProviderClient,
    pending: PendingStates,
}

impl HandshakeCoordinator {
    pub fn new(provider: ProviderClient) -> Self {
        Self {
            provider,
            pending: PendingStates::default(),
        }
    }

    pub fn with_pending_states(mut self, pending: PendingStates) -> Self {
        self.pending = pending;
        self
    }

    pub fn provider(&self) -> &ProviderClient {
        &self.provider
    }

    pub fn pending(&self) -> &PendingStates {
        &self.pending
    }

    /// Issue a state and build the provider authorization URL for it.
    pub fn start_login(&self) -> Result<LoginRedirect, HandshakeError> {
        let state = self.pending.issue();
        let url = match self.provider.authorization_url(&state) {
            Ok(url) => url,
            Err(e) => {
                self.pending.consume(&state);
                return Err(e.into());
            }
        };
        tracing::debug!("Issued login state");
        Ok(LoginRedirect { url, state })
    }

    /// Validate a callback and exchange its code.
    ///
    /// `cookie_state` is the state the browser carried back in its cookie.
    /// The returned state is consumed before anything else is checked, so a
    /// state never validates twice.
    pub async fn complete(
        &self,
        params: &CallbackParams,
        cookie_state: Option<&str>,
    ) -> Result<TokenGrant, HandshakeError> {
        let issued = params
            .state
            .as_deref()
            .is_some_and(|state| self.pending.consume(state));

        if let Some(error) = &params.error {
            tracing::warn!("Provider returned error: {}", error);
            return Err(HandshakeError::ProviderDenied {
                error: error.clone(),
            });
        }

        let matches_cookie = match (params.state.as_deref(), cookie_state) {
            (Some(returned), Some(cookie)) => returned == cookie,
            _ => false,
        };
        if !issued || !matches_cookie {
            tracing::warn!("OAuth state mismatch");
            return Err(HandshakeError::StateMismatch);
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(HandshakeError::NoCode)?;

        self.provider
            .exchange_code(code)
            .await
            .map_err(|e| match e {
                ProviderError::Config(c) => HandshakeError::Config(c),
                other => {
                    tracing::error!("Code exchange failed: {}", other);
                    HandshakeError::TokenExchange {
                        message: other.to_string(),
                    }
                }
            })
    }
}
