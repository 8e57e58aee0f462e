//! Playback device bootstrap.
//!
//! A device is created from one credential and lives until it is
//! disconnected. The runtime that actually plays audio is behind
//! [`PlaybackRuntime`]; [`HeadlessRuntime`] is the in-process implementation.
//!
//! Bootstrap is a single attempt: the first [`DeviceEvent`] the runtime emits
//! decides the outcome. Later events are only logged. A newer attempt, or
//! [`DeviceBootstrapper::cancel`], ends any attempt still waiting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::model::{Credential, CredentialKind};
use crate::refresh::{
    CredentialCell, RefreshError, RefreshingTokenSource, StaticTokenSource, TokenRefreshService,
};
use crate::store::Secret;

mod headless;

pub use headless::HeadlessRuntime;

/// Name the device registers under.
pub const DEVICE_NAME: &str = "Good Vibes Only 💖";

/// Initial volume, in `0.0..=1.0`.
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Supplies access tokens to a running device whenever it asks.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<Secret, RefreshError>;
}

/// Construction parameters handed to the runtime.
#[derive(Clone)]
pub struct PlayerOptions {
    pub name: String,
    pub volume: f32,
    pub token_source: Arc<dyn AccessTokenSource>,
}

impl std::fmt::Debug for PlayerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerOptions")
            .field("name", &self.name)
            .field("volume", &self.volume)
            .finish_non_exhaustive()
    }
}

/// Lifecycle events reported by a connected player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Ready { device_id: String },
    NotReady { device_id: String },
    InitializationError { message: String },
    AuthenticationError { message: String },
    AccountError { message: String },
    PlaybackError { message: String },
}

/// A runtime able to host playback devices.
#[async_trait]
pub trait PlaybackRuntime: Send + Sync {
    /// Make the runtime available. Called before every connect.
    async fn load(&self) -> Result<(), BootstrapError>;

    /// Create and connect a player. Lifecycle events go to `events`.
    async fn connect(
        &self,
        options: PlayerOptions,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Box<dyn PlayerHandle>, BootstrapError>;
}

/// Handle to a connected player.
pub trait PlayerHandle: Send + Sync {
    /// Disconnect the player. Must not block and must tolerate repeat calls.
    fn disconnect(&self);
}

/// Device bootstrap failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("playback runtime unavailable: {message}")]
    RuntimeUnavailable { message: String },

    #[error("device {device_id} went offline before becoming ready")]
    NotReady { device_id: String },

    #[error("player initialization failed: {message}")]
    Initialization { message: String },

    #[error("player authentication failed: {message}")]
    Authentication { message: String },

    #[error("account not eligible for playback: {message}")]
    Account { message: String },

    #[error("playback failed: {message}")]
    Playback { message: String },

    #[error("device not ready after {0:?}")]
    Timeout(Duration),

    #[error("runtime stopped reporting before the device became ready")]
    Aborted,

    /// A newer bootstrap started, or the attempt was cancelled.
    #[error("device bootstrap cancelled")]
    Cancelled,
}

impl DeviceEvent {
    /// The outcome this event decides when it is the first one seen.
    fn into_outcome(self) -> Result<String, BootstrapError> {
        match self {
            DeviceEvent::Ready { device_id } => Ok(device_id),
            DeviceEvent::NotReady { device_id } => Err(BootstrapError::NotReady { device_id }),
            DeviceEvent::InitializationError { message } => {
                Err(BootstrapError::Initialization { message })
            }
            DeviceEvent::AuthenticationError { message } => {
                Err(BootstrapError::Authentication { message })
            }
            DeviceEvent::AccountError { message } => Err(BootstrapError::Account { message }),
            DeviceEvent::PlaybackError { message } => Err(BootstrapError::Playback { message }),
        }
    }
}

/// A connected playback device.
///
/// Disconnects when dropped.
pub struct Device {
    id: String,
    kind: CredentialKind,
    cell: CredentialCell,
    handle: Box<dyn PlayerHandle>,
    watcher: JoinHandle<()>,
    connected: bool,
}

impl Device {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Which credential lifecycle drives this device.
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// The credential the device reads its tokens from.
    pub fn credential(&self) -> &CredentialCell {
        &self.cell
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.watcher.abort();
        self.handle.disconnect();
        tracing::info!("Disconnected device {}", self.id);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

/// A connected player not yet handed over to a [`Device`].
///
/// Disconnects when dropped, so an attempt that fails or is cancelled never
/// leaves a player behind.
struct PendingPlayer(Option<Box<dyn PlayerHandle>>);

impl PendingPlayer {
    fn into_inner(mut self) -> Option<Box<dyn PlayerHandle>> {
        self.0.take()
    }
}

impl Drop for PendingPlayer {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.disconnect();
        }
    }
}

/// Turns a credential into a connected [`Device`].
pub struct DeviceBootstrapper {
    runtime: Arc<dyn PlaybackRuntime>,
    refresh: TokenRefreshService,
    ready_timeout: Option<Duration>,
    /// Number of the latest attempt. Bumping it ends every older attempt.
    attempts: watch::Sender<u64>,
}

impl DeviceBootstrapper {
    pub fn new(runtime: Arc<dyn PlaybackRuntime>, refresh: TokenRefreshService) -> Self {
        Self {
            runtime,
            refresh,
            ready_timeout: None,
            attempts: watch::Sender::new(0),
        }
    }

    /// Reject with [`BootstrapError::Timeout`] if no event arrives in time.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// End any pending attempt with [`BootstrapError::Cancelled`].
    pub fn cancel(&self) {
        self.attempts.send_modify(|n| *n += 1);
    }

    /// Connect a device driven by `credential`.
    ///
    /// Refresh-capable credentials get a token callback that refreshes on
    /// every request; others hand out the static access token. Starting this
    /// cancels any attempt still pending.
    pub async fn bootstrap(&self, credential: Credential) -> Result<Device, BootstrapError> {
        let mut attempt = 0;
        self.attempts.send_modify(|n| {
            *n += 1;
            attempt = *n;
        });
        let mut attempts = self.attempts.subscribe();

        tokio::select! {
            result = self.connect(credential) => result,
            _ = attempts.wait_for(|n| *n != attempt) => {
                tracing::info!("Device bootstrap cancelled");
                Err(BootstrapError::Cancelled)
            }
        }
    }

    async fn connect(&self, credential: Credential) -> Result<Device, BootstrapError> {
        self.runtime.load().await?;

        let kind = credential.kind();
        let cell = CredentialCell::new(credential);
        let token_source: Arc<dyn AccessTokenSource> = if cell.can_refresh() {
            Arc::new(RefreshingTokenSource::new(self.refresh.clone(), cell.clone()))
        } else {
            Arc::new(StaticTokenSource::new(cell.clone()))
        };

        let options = PlayerOptions {
            name: DEVICE_NAME.to_string(),
            volume: DEFAULT_VOLUME,
            token_source,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let player = PendingPlayer(Some(self.runtime.connect(options, tx).await?));

        let first = match self.ready_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    tracing::error!("Device not ready after {:?}", timeout);
                    return Err(BootstrapError::Timeout(timeout));
                }
            },
            None => rx.recv().await,
        };

        let device_id = match first.map(DeviceEvent::into_outcome) {
            Some(Ok(device_id)) => device_id,
            Some(Err(e)) => {
                tracing::error!("Device bootstrap failed: {}", e);
                return Err(e);
            }
            None => return Err(BootstrapError::Aborted),
        };
        let handle = player.into_inner().ok_or(BootstrapError::Aborted)?;

        tracing::info!("Device ready with id {} ({} credential)", device_id, kind);

        let watcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    DeviceEvent::Ready { device_id } => {
                        tracing::info!("Device {} ready", device_id)
                    }
                    DeviceEvent::NotReady { device_id } => {
                        tracing::warn!("Device {} went offline", device_id)
                    }
                    other => tracing::error!("Device error: {:?}", other),
                }
            }
        });

        Ok(Device {
            id: device_id,
            kind,
            cell,
            handle,
            watcher,
            connected: true,
        })
    }
}

impl std::fmt::Debug for DeviceBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBootstrapper")
            .field("ready_timeout", &self.ready_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymous::CredentialsError;
    use crate::backend::AuthBackend;
    use crate::error::HandshakeError;
    use crate::model::{TokenGrant, UserTokens};
    use chrono::Utc;
    use parking_lot::Mutex;

    struct NoBackend;

    #[async_trait]
    impl AuthBackend for NoBackend {
        async fn refresh(&self, _refresh_token: &Secret) -> Result<TokenGrant, RefreshError> {
            Ok(TokenGrant::new("refreshed", 3600))
        }

        async fn anonymous_token(&self) -> Result<TokenGrant, CredentialsError> {
            unreachable!()
        }

        async fn fetch_handoff(&self) -> Result<UserTokens, HandshakeError> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct Recorded {
        options: Option<PlayerOptions>,
        disconnects: usize,
    }

    /// Emits a scripted sequence of events on connect.
    struct ScriptedRuntime {
        events: Vec<DeviceEvent>,
        recorded: Arc<Mutex<Recorded>>,
        keep_sender: bool,
    }

    struct ScriptedHandle {
        recorded: Arc<Mutex<Recorded>>,
        _sender: Option<mpsc::UnboundedSender<DeviceEvent>>,
    }

    impl PlayerHandle for ScriptedHandle {
        fn disconnect(&self) {
            self.recorded.lock().disconnects += 1;
        }
    }

    #[async_trait]
    impl PlaybackRuntime for ScriptedRuntime {
        async fn load(&self) -> Result<(), BootstrapError> {
            Ok(())
        }

        async fn connect(
            &self,
            options: PlayerOptions,
            events: mpsc::UnboundedSender<DeviceEvent>,
        ) -> Result<Box<dyn PlayerHandle>, BootstrapError> {
            self.recorded.lock().options = Some(options);
            for event in &self.events {
                let _ = events.send(event.clone());
            }
            Ok(Box::new(ScriptedHandle {
                recorded: self.recorded.clone(),
                _sender: self.keep_sender.then_some(events),
            }))
        }
    }

    fn bootstrapper(events: Vec<DeviceEvent>) -> (DeviceBootstrapper, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let runtime = ScriptedRuntime {
            events,
            recorded: recorded.clone(),
            keep_sender: false,
        };
        let service = TokenRefreshService::new(Arc::new(NoBackend));
        (DeviceBootstrapper::new(Arc::new(runtime), service), recorded)
    }

    #[tokio::test]
    async fn test_ready_resolves_with_device_id() {
        let (bootstrapper, recorded) = bootstrapper(vec![DeviceEvent::Ready {
            device_id: "dev-1".into(),
        }]);

        let device = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap();

        assert_eq!(device.id(), "dev-1");
        assert_eq!(device.kind(), CredentialKind::User);
        let options = recorded.lock().options.clone().unwrap();
        assert_eq!(options.name, DEVICE_NAME);
        assert_eq!(options.volume, DEFAULT_VOLUME);
    }

    #[tokio::test]
    async fn test_user_credential_callback_refreshes() {
        let (bootstrapper, recorded) = bootstrapper(vec![DeviceEvent::Ready {
            device_id: "dev-1".into(),
        }]);

        let device = bootstrapper
            .bootstrap(Credential::user("stale", "r"))
            .await
            .unwrap();

        let source = recorded.lock().options.clone().unwrap().token_source;
        assert_eq!(source.access_token().await.unwrap().expose(), "refreshed");
        assert_eq!(device.credential().access_token().expose(), "refreshed");
    }

    #[tokio::test]
    async fn test_anonymous_credential_callback_is_static() {
        let (bootstrapper, recorded) = bootstrapper(vec![DeviceEvent::Ready {
            device_id: "dev-1".into(),
        }]);

        bootstrapper
            .bootstrap(Credential::anonymous("anon", Utc::now()))
            .await
            .unwrap();

        let source = recorded.lock().options.clone().unwrap().token_source;
        assert_eq!(source.access_token().await.unwrap().expose(), "anon");
    }

    #[tokio::test]
    async fn test_error_event_rejects_and_disconnects() {
        let (bootstrapper, recorded) = bootstrapper(vec![DeviceEvent::AccountError {
            message: "premium required".into(),
        }]);

        let err = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BootstrapError::Account {
                message: "premium required".into()
            }
        );
        assert_eq!(recorded.lock().disconnects, 1);
    }

    #[tokio::test]
    async fn test_not_ready_rejects() {
        let (bootstrapper, _) = bootstrapper(vec![DeviceEvent::NotReady {
            device_id: "dev-1".into(),
        }]);

        let err = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_silent_runtime_is_aborted() {
        let (bootstrapper, _) = bootstrapper(Vec::new());

        let err = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap_err();

        assert_eq!(err, BootstrapError::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let runtime = ScriptedRuntime {
            events: Vec::new(),
            recorded: recorded.clone(),
            keep_sender: true,
        };
        let bootstrapper = DeviceBootstrapper::new(
            Arc::new(runtime),
            TokenRefreshService::new(Arc::new(NoBackend)),
        )
        .with_ready_timeout(Duration::from_secs(10));

        let err = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap_err();

        assert_eq!(err, BootstrapError::Timeout(Duration::from_secs(10)));
        assert_eq!(recorded.lock().disconnects, 1);
    }

    /// Stays silent on the first connect and reports ready on later ones.
    struct SilentFirstRuntime {
        connects: Mutex<usize>,
        recorded: Arc<Mutex<Recorded>>,
    }

    #[async_trait]
    impl PlaybackRuntime for SilentFirstRuntime {
        async fn load(&self) -> Result<(), BootstrapError> {
            Ok(())
        }

        async fn connect(
            &self,
            _options: PlayerOptions,
            events: mpsc::UnboundedSender<DeviceEvent>,
        ) -> Result<Box<dyn PlayerHandle>, BootstrapError> {
            let n = {
                let mut connects = self.connects.lock();
                *connects += 1;
                *connects
            };
            if n > 1 {
                let _ = events.send(DeviceEvent::Ready {
                    device_id: format!("dev-{}", n),
                });
            }
            Ok(Box::new(ScriptedHandle {
                recorded: self.recorded.clone(),
                _sender: Some(events),
            }))
        }
    }

    fn silent_first() -> (
        Arc<DeviceBootstrapper>,
        Arc<SilentFirstRuntime>,
        Arc<Mutex<Recorded>>,
    ) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let runtime = Arc::new(SilentFirstRuntime {
            connects: Mutex::new(0),
            recorded: recorded.clone(),
        });
        let bootstrapper = DeviceBootstrapper::new(
            runtime.clone(),
            TokenRefreshService::new(Arc::new(NoBackend)),
        );
        (Arc::new(bootstrapper), runtime, recorded)
    }

    async fn connected(runtime: &SilentFirstRuntime) {
        while *runtime.connects.lock() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_newer_attempt_cancels_pending_one() {
        let (bootstrapper, runtime, recorded) = silent_first();

        let pending = tokio::spawn({
            let bootstrapper = bootstrapper.clone();
            async move {
                bootstrapper
                    .bootstrap(Credential::anonymous("anon", Utc::now()))
                    .await
            }
        });
        connected(&runtime).await;

        let device = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap();

        assert_eq!(device.id(), "dev-2");
        assert_eq!(device.kind(), CredentialKind::User);
        assert_eq!(pending.await.unwrap().unwrap_err(), BootstrapError::Cancelled);
        // Only the abandoned player was disconnected
        assert_eq!(recorded.lock().disconnects, 1);
        assert!(device.is_connected());
    }

    #[tokio::test]
    async fn test_cancel_ends_pending_attempt() {
        let (bootstrapper, runtime, recorded) = silent_first();

        let pending = tokio::spawn({
            let bootstrapper = bootstrapper.clone();
            async move { bootstrapper.bootstrap(Credential::user("a", "r")).await }
        });
        connected(&runtime).await;

        bootstrapper.cancel();

        assert_eq!(pending.await.unwrap().unwrap_err(), BootstrapError::Cancelled);
        assert_eq!(recorded.lock().disconnects, 1);
    }

    #[tokio::test]
    async fn test_device_disconnects_once() {
        let (bootstrapper, recorded) = bootstrapper(vec![DeviceEvent::Ready {
            device_id: "dev-1".into(),
        }]);

        let mut device = bootstrapper
            .bootstrap(Credential::user("a", "r"))
            .await
            .unwrap();
        device.disconnect();
        device.disconnect();
        drop(device);

        assert_eq!(recorded.lock().disconnects, 1);
    }
}
