//! HTTP server setup and lifecycle.

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handlers::{
    ApiState, anonymous_token, health, login_start, oauth_callback, token_handoff, token_refresh,
};

/// Build the router with every endpoint.
pub fn make_router(state: ApiState) -> Router {
    Router::new()
        .route("/login-start", get(login_start))
        .route("/oauth-callback", get(oauth_callback))
        .route("/token-handoff", get(token_handoff))
        .route("/token-refresh", post(token_refresh))
        .route("/anonymous-token", get(anonymous_token))
        .route("/health", get(health))
        .with_state(state)
}

/// Handle to a running HTTP server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Bind `addr` and start serving.
///
/// # Returns
///
/// A handle to the running server that can be used to stop it.
pub async fn start_server(addr: SocketAddr, state: ApiState) -> Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read bound address")?;

    let app = make_router(state);
    let (tx, rx) = oneshot::channel::<()>();

    let server_task: JoinHandle<()> = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
                debug!("Server shutdown signal received");
            })
            .await;
        if let Err(e) = result {
            warn!("HTTP server error: {}", e);
        }
    });

    info!("HTTP server listening on {}", local_addr);

    Ok(ServerHandle {
        local_addr,
        shutdown: Mutex::new(Some(tx)),
        join_handle: Mutex::new(Some(server_task)),
    })
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server and wait for in-flight requests to finish.
    pub async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.join_handle.lock().await.take() {
            // If the task panicked, surface the error
            handle.await?;
        }

        Ok(())
    }
}
