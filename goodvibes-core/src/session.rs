//! The session state machine.
//!
//! A [`Session`] owns one client context's credentials and its playback
//! device, and is the only thing that moves between [`SessionState`]s:
//!
//! ```text
//! Unknown -> Loading -> LoggedIn | BrowseOnly | LoggedOut
//! ```
//!
//! Every service failure is turned into a transition here. The user path
//! falls back to anonymous access at most once per status check, and
//! [`Session::logout`] always leaves no device and no refresh timer behind.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;

use crate::anonymous::ClientCredentialsService;
use crate::backend::AuthBackend;
use crate::device::{BootstrapError, Device, DeviceBootstrapper, PlaybackRuntime};
use crate::error::{HandshakeError, SessionError};
use crate::model::{Credential, CredentialKind, UserTokens};
use crate::refresh::{REFRESH_INTERVAL, RefreshTimer, TokenRefreshService};
use crate::store::Secret;
use crate::token_store::TokenStore;

/// Where the user is sent after logging out.
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No status check has run yet.
    Unknown,
    /// A status check or login is in progress.
    Loading,
    /// A user credential drives the device.
    LoggedIn,
    /// No credential and no device.
    LoggedOut,
    /// An anonymous credential drives the device.
    BrowseOnly,
}

impl SessionState {
    /// Whether the session has settled into a usable state.
    pub fn is_settled(self) -> bool {
        !matches!(self, SessionState::Unknown | SessionState::Loading)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Unknown => "unknown",
            SessionState::Loading => "loading",
            SessionState::LoggedIn => "logged_in",
            SessionState::LoggedOut => "logged_out",
            SessionState::BrowseOnly => "browse_only",
        };
        f.write_str(s)
    }
}

/// Moves the user agent to another page.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str) {
        tracing::info!("Navigate to {}", path);
    }
}

/// The device currently in use and the refresh timer bound to it.
struct ActiveDevice {
    device: Device,
    timer: Option<RefreshTimer>,
}

impl ActiveDevice {
    fn teardown(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.device.disconnect();
    }
}

struct SessionInner {
    user_tokens: Option<UserTokens>,
    anonymous: Option<Credential>,
    fallback_attempted: bool,
    active: Option<ActiveDevice>,
    /// Bumped by every logout, login and shutdown. Work started under an
    /// older generation must not install its result.
    generation: u64,
}

struct Shared {
    state: watch::Sender<SessionState>,
    inner: Mutex<SessionInner>,
    store: TokenStore,
    refresh: TokenRefreshService,
    anonymous: ClientCredentialsService,
    bootstrapper: DeviceBootstrapper,
    backend: Arc<dyn AuthBackend>,
    navigator: Arc<dyn Navigator>,
    refresh_interval: Duration,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    backend: Arc<dyn AuthBackend>,
    runtime: Arc<dyn PlaybackRuntime>,
    store: TokenStore,
    navigator: Arc<dyn Navigator>,
    refresh_interval: Duration,
    ready_timeout: Option<Duration>,
}

impl SessionBuilder {
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Session {
        let refresh = TokenRefreshService::new(self.backend.clone());
        let anonymous = ClientCredentialsService::new(self.backend.clone());
        let mut bootstrapper = DeviceBootstrapper::new(self.runtime, refresh.clone());
        if let Some(timeout) = self.ready_timeout {
            bootstrapper = bootstrapper.with_ready_timeout(timeout);
        }
        let (state, _) = watch::channel(SessionState::Unknown);

        Session {
            shared: Arc::new(Shared {
                state,
                inner: Mutex::new(SessionInner {
                    user_tokens: None,
                    anonymous: None,
                    fallback_attempted: false,
                    active: None,
                    generation: 0,
                }),
                store: self.store,
                refresh,
                anonymous,
                bootstrapper,
                backend: self.backend,
                navigator: self.navigator,
                refresh_interval: self.refresh_interval,
            }),
        }
    }
}

/// One client context's session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn builder(
        backend: Arc<dyn AuthBackend>,
        runtime: Arc<dyn PlaybackRuntime>,
        store: TokenStore,
    ) -> SessionBuilder {
        SessionBuilder {
            backend,
            runtime,
            store,
            navigator: Arc::new(LogNavigator),
            refresh_interval: REFRESH_INTERVAL,
            ready_timeout: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_settled()
    }

    pub fn active_device_id(&self) -> Option<String> {
        let inner = self.shared.inner.lock();
        inner.active.as_ref().map(|a| a.device.id().to_string())
    }

    pub fn has_refresh_timer(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner
            .active
            .as_ref()
            .and_then(|a| a.timer.as_ref())
            .is_some_and(RefreshTimer::is_active)
    }

    /// The access token the active device is currently using.
    pub fn current_access_token(&self) -> Option<Secret> {
        let inner = self.shared.inner.lock();
        inner
            .active
            .as_ref()
            .map(|a| a.device.credential().access_token())
    }

    /// The user token pair of the current login, if any.
    pub fn user_tokens(&self) -> Option<UserTokens> {
        self.shared.inner.lock().user_tokens.clone()
    }

    /// Resolve the session from stored credentials.
    ///
    /// Runs once per `Unknown` episode; any other call returns the current
    /// state without doing anything.
    pub async fn check_status(&self) -> SessionState {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Unknown {
                *state = SessionState::Loading;
                true
            } else {
                false
            }
        });
        if !started {
            return self.state();
        }

        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.fallback_attempted = false;
            inner.generation
        };
        tracing::info!("Checking session status");

        match self.shared.store.load_user_tokens().await {
            Some(tokens) if tokens.is_complete() => {
                match self.resume_user_session(tokens, generation).await {
                    Ok(()) => return self.state(),
                    Err(SessionError::Superseded) => return self.state(),
                    Err(e) if e.rejects_credential() => {
                        tracing::warn!("Stored user session could not be resumed: {}", e);
                        if let Err(e) = self.shared.store.clear_user_tokens().await {
                            tracing::warn!("Could not clear stored user tokens: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Stored user session not resumed, keeping tokens: {}", e);
                    }
                }
            }
            Some(_) => tracing::debug!("Ignoring incomplete stored user tokens"),
            None => tracing::debug!("No stored user tokens"),
        }

        match self.anonymous_fallback(generation).await {
            Ok(()) => {}
            Err(SessionError::Superseded) => {}
            Err(e) => {
                tracing::warn!("Anonymous fallback failed: {}", e);
                self.logout_if_current(generation).await;
            }
        }
        self.state()
    }

    /// Start a user session from a token pair obtained by the handshake.
    ///
    /// At least one token must be present. On any failure the session is
    /// logged out before the error is returned.
    pub async fn set_logged_in(&self, tokens: UserTokens) -> Result<(), SessionError> {
        if tokens.is_empty() {
            tracing::error!("Login attempted without tokens");
            self.logout().await;
            return Err(SessionError::NoTokens);
        }

        let generation = self.begin(SessionState::Loading);

        match self.login(tokens, generation).await {
            Ok(()) => Ok(()),
            Err(SessionError::Superseded) => Err(SessionError::Superseded),
            Err(e) => {
                tracing::error!("Login failed: {}", e);
                self.logout_if_current(generation).await;
                Err(e)
            }
        }
    }

    /// Complete a login from the tokens the handshake staged.
    pub async fn process_auth_callback(&self) -> Result<(), SessionError> {
        let tokens = match self.shared.store.take_handoff().await {
            Some(tokens) => tokens,
            None => match self.shared.backend.fetch_handoff().await {
                Ok(tokens) => tokens,
                Err(e) => {
                    tracing::error!("Token hand-off failed: {}", e);
                    self.logout().await;
                    return Err(e.into());
                }
            },
        };

        if !tokens.is_complete() {
            tracing::error!("Token hand-off was incomplete");
            self.logout().await;
            return Err(HandshakeError::IncompleteHandoff.into());
        }

        self.set_logged_in(tokens).await
    }

    /// End the session: drop every credential, disconnect the device, stop
    /// the refresh timer and send the user to the login page.
    ///
    /// Safe to call in any state, any number of times.
    pub async fn logout(&self) {
        self.begin(SessionState::LoggedOut);

        if let Err(e) = self.shared.store.clear_user_tokens().await {
            tracing::warn!("Could not clear stored user tokens: {}", e);
        }
        self.shared.anonymous.invalidate().await;

        tracing::info!("Logged out");
        self.shared.navigator.navigate(LOGIN_PATH);
    }

    /// Log out only if no logout or login happened since `generation`.
    pub async fn logout_if_current(&self, generation: u64) {
        let current = self.shared.inner.lock().generation == generation;
        if !current {
            tracing::debug!("Skipping logout for stale session generation {}", generation);
            return;
        }
        self.logout().await;
    }

    /// Tear down the device and return to `Unknown`, keeping stored tokens.
    pub fn shutdown(&self) {
        self.begin(SessionState::Unknown);
        tracing::debug!("Session shut down");
    }

    /// Start a new generation: tear down the active device and its timer,
    /// reset in-memory credentials and move to `state`, all in one step.
    fn begin(&self, state: SessionState) -> u64 {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        inner.user_tokens = None;
        inner.anonymous = None;
        inner.fallback_attempted = false;
        if let Some(active) = inner.active.take() {
            active.teardown();
        }
        self.shared.bootstrapper.cancel();
        self.shared.state.send_replace(state);
        inner.generation
    }

    fn ensure_current(&self, generation: u64) -> Result<(), SessionError> {
        if self.shared.inner.lock().generation == generation {
            Ok(())
        } else {
            Err(SessionError::Superseded)
        }
    }

    async fn resume_user_session(
        &self,
        tokens: UserTokens,
        generation: u64,
    ) -> Result<(), SessionError> {
        let refresh_token = tokens.refresh_token.ok_or(SessionError::NoTokens)?;
        let refreshed = self.shared.refresh.refresh(&refresh_token).await;
        // A stale failure must not clear tokens a newer login stored.
        self.ensure_current(generation)?;
        self.connect_user(refreshed?, generation).await
    }

    async fn login(&self, tokens: UserTokens, generation: u64) -> Result<(), SessionError> {
        let credential = match tokens.to_credential() {
            Some(credential) => credential,
            None => {
                // Only a refresh token: get an access token first.
                let refresh_token = tokens.refresh_token.ok_or(SessionError::NoTokens)?;
                let credential = self.shared.refresh.refresh(&refresh_token).await?;
                self.ensure_current(generation)?;
                credential
            }
        };

        self.connect_user(credential, generation).await?;

        if let Err(e) = self.shared.store.clear_handoff().await {
            tracing::warn!("Could not clear hand-off artifacts: {}", e);
        }
        Ok(())
    }

    /// Bootstrap a device for `generation`. An attempt cancelled by a newer
    /// generation reports [`SessionError::Superseded`].
    async fn bootstrap(
        &self,
        credential: Credential,
        generation: u64,
    ) -> Result<Device, SessionError> {
        match self.shared.bootstrapper.bootstrap(credential).await {
            Ok(device) => Ok(device),
            Err(BootstrapError::Cancelled) => {
                self.ensure_current(generation)?;
                Err(BootstrapError::Cancelled.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bootstrap a device for a user credential, install it and persist the
    /// token pair.
    async fn connect_user(
        &self,
        credential: Credential,
        generation: u64,
    ) -> Result<(), SessionError> {
        let device = self.bootstrap(credential, generation).await?;
        let tokens = self.install(generation, device, SessionState::LoggedIn)?;

        self.shared.store.persist_user_tokens(&tokens).await?;
        if self.ensure_current(generation).is_err() {
            // Logged out while persisting; the write must not outlive it.
            self.shared.store.clear_user_tokens().await?;
            return Err(SessionError::Superseded);
        }

        tracing::info!("Logged in");
        Ok(())
    }

    async fn anonymous_fallback(&self, generation: u64) -> Result<(), SessionError> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation {
                return Err(SessionError::Superseded);
            }
            if inner.fallback_attempted {
                return Err(SessionError::FallbackAlreadyAttempted);
            }
            inner.fallback_attempted = true;
        }

        let credential = self.shared.anonymous.get_anonymous_token().await?;
        self.ensure_current(generation)?;
        let device = self.bootstrap(credential, generation).await?;
        self.install(generation, device, SessionState::BrowseOnly)?;

        tracing::info!("Browsing anonymously");
        Ok(())
    }

    /// Make `device` the active device and move to `state`.
    ///
    /// Returns the user token pair the device runs on (the access half is
    /// the latest one the device fetched).
    fn install(
        &self,
        generation: u64,
        device: Device,
        state: SessionState,
    ) -> Result<UserTokens, SessionError> {
        let mut inner = self.shared.inner.lock();
        if inner.generation != generation {
            // Dropping the device disconnects it.
            return Err(SessionError::Superseded);
        }

        let credential = device.credential().get();
        let tokens = UserTokens {
            access_token: Some(credential.access_token.clone()),
            refresh_token: credential.refresh_token.clone(),
        };

        let timer = (state == SessionState::LoggedIn && device.kind() == CredentialKind::User)
            .then(|| self.spawn_refresh_timer(&device, generation));

        if state == SessionState::LoggedIn {
            inner.user_tokens = Some(tokens.clone());
            inner.anonymous = None;
        } else {
            inner.user_tokens = None;
            inner.anonymous = Some(credential);
        }

        if let Some(previous) = inner.active.replace(ActiveDevice { device, timer }) {
            previous.teardown();
        }
        self.shared.state.send_replace(state);
        Ok(tokens)
    }

    fn spawn_refresh_timer(&self, device: &Device, generation: u64) -> RefreshTimer {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        RefreshTimer::spawn(
            self.shared.refresh.clone(),
            device.credential().clone(),
            self.shared.refresh_interval,
            move |_| {
                if let Some(shared) = weak.upgrade() {
                    // The timer task is aborted by the logout, so the logout
                    // has to run on its own task.
                    tokio::spawn(async move {
                        Session { shared }.logout_if_current(generation).await;
                    });
                }
            },
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
