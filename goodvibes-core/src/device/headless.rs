//! A playback runtime with no audio output.
//!
//! The player asks its token source for an access token exactly as a real
//! player does on startup, then reports ready under a generated device id.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{BootstrapError, DeviceEvent, PlaybackRuntime, PlayerHandle, PlayerOptions};

#[derive(Debug, Default)]
pub struct HeadlessRuntime {
    loaded: AtomicBool,
}

impl HeadlessRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

struct HeadlessPlayer {
    task: JoinHandle<()>,
}

impl PlayerHandle for HeadlessPlayer {
    fn disconnect(&self) {
        self.task.abort();
    }
}

#[async_trait]
impl PlaybackRuntime for HeadlessRuntime {
    async fn load(&self) -> Result<(), BootstrapError> {
        if !self.loaded.swap(true, Ordering::AcqRel) {
            tracing::debug!("Headless playback runtime loaded");
        }
        Ok(())
    }

    async fn connect(
        &self,
        options: PlayerOptions,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Box<dyn PlayerHandle>, BootstrapError> {
        if !self.loaded.load(Ordering::Acquire) {
            return Err(BootstrapError::RuntimeUnavailable {
                message: "runtime not loaded".to_string(),
            });
        }

        let task = tokio::spawn(async move {
            let event = match options.token_source.access_token().await {
                Ok(_) => DeviceEvent::Ready {
                    device_id: Uuid::new_v4().simple().to_string(),
                },
                Err(e) => DeviceEvent::AuthenticationError {
                    message: e.to_string(),
                },
            };
            tracing::debug!("Headless player '{}' reporting {:?}", options.name, event);
            let _ = events.send(event);
        });

        Ok(Box::new(HeadlessPlayer { task }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AccessTokenSource;
    use crate::refresh::RefreshError;
    use crate::store::Secret;
    use std::sync::Arc;

    struct FixedSource(Result<Secret, RefreshError>);

    #[async_trait]
    impl AccessTokenSource for FixedSource {
        async fn access_token(&self) -> Result<Secret, RefreshError> {
            self.0.clone()
        }
    }

    fn options(source: FixedSource) -> PlayerOptions {
        PlayerOptions {
            name: "test".to_string(),
            volume: 1.0,
            token_source: Arc::new(source),
        }
    }

    #[tokio::test]
    async fn test_connect_requires_load() {
        let runtime = HeadlessRuntime::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = runtime
            .connect(options(FixedSource(Ok(Secret::new("t")))), tx)
            .await;

        assert!(matches!(
            result,
            Err(BootstrapError::RuntimeUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_reports_ready_with_token() {
        let runtime = HeadlessRuntime::new();
        runtime.load().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _player = runtime
            .connect(options(FixedSource(Ok(Secret::new("t")))), tx)
            .await
            .unwrap();

        match rx.recv().await {
            Some(DeviceEvent::Ready { device_id }) => assert_eq!(device_id.len(), 32),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reports_authentication_error_when_token_fails() {
        let runtime = HeadlessRuntime::new();
        runtime.load().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _player = runtime
            .connect(
                options(FixedSource(Err(RefreshError::Rejected {
                    status: 400,
                    message: "invalid_grant".into(),
                }))),
                tx,
            )
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(DeviceEvent::AuthenticationError { .. })
        ));
    }
}
