//! HTTP handlers for the handshake and token endpoints.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use goodvibes_core::{CallbackParams, HandshakeCoordinator, HandshakeError, ProviderError, UserTokens};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::types::{AccessTokenResponse, ErrorResponse, HandoffResponse, RefreshRequest};
use crate::handoff::HandoffRegistry;

/// Cookie carrying the issued OAuth state back to the callback.
pub const STATE_COOKIE: &str = "auth_state";

/// Cookie carrying the hand-off pickup id.
pub const HANDOFF_COOKIE: &str = "handoff_id";

/// State shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<HandshakeCoordinator>,
    pub handoffs: Arc<HandoffRegistry>,
    /// Public URL of the application.
    pub base_url: Url,
}

impl ApiState {
    pub fn new(coordinator: HandshakeCoordinator, base_url: Url) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            handoffs: Arc::new(HandoffRegistry::default()),
            base_url,
        }
    }

    pub fn with_handoffs(mut self, handoffs: HandoffRegistry) -> Self {
        self.handoffs = Arc::new(handoffs);
        self
    }

    fn page(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base_path, path));
        url
    }

    /// Where a failed handshake sends the browser.
    fn error_redirect(&self, err: &HandshakeError) -> Redirect {
        let mut url = match err {
            HandshakeError::ProviderDenied { .. }
            | HandshakeError::StateMismatch
            | HandshakeError::NoCode
            | HandshakeError::Config(_)
            | HandshakeError::TokenExchange { .. } => self.base_url.clone(),
            _ => self.page("/login"),
        };
        url.query_pairs_mut().append_pair("error", err.reason());
        Redirect::temporary(url.as_str())
    }
}

fn short_lived_cookie(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age.as_secs() as i64))
        .build()
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// `GET /login-start`: issue a state and send the browser to the provider.
pub async fn login_start(State(state): State<ApiState>, jar: CookieJar) -> Response {
    match state.coordinator.start_login() {
        Ok(login) => {
            info!("Starting login");
            let cookie = short_lived_cookie(
                STATE_COOKIE,
                login.state,
                goodvibes_core::oauth::STATE_TTL,
            );
            (jar.add(cookie), Redirect::temporary(login.url.as_str())).into_response()
        }
        Err(e) => {
            error!("Cannot start login: {}", e);
            state.error_redirect(&e).into_response()
        }
    }
}

/// `GET /oauth-callback`: validate, exchange and stage the tokens.
pub async fn oauth_callback(
    State(state): State<ApiState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let cookie_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(removal_cookie(STATE_COOKIE));

    let grant = match state
        .coordinator
        .complete(&params, cookie_state.as_deref())
        .await
    {
        Ok(grant) => grant,
        Err(e) => {
            warn!("OAuth callback failed: {}", e);
            return (jar, state.error_redirect(&e)).into_response();
        }
    };

    let tokens = UserTokens {
        access_token: Some(grant.access_token.clone()),
        refresh_token: grant.refresh_token.clone(),
    };
    let id = state.handoffs.stage(tokens);
    let cookie = short_lived_cookie(HANDOFF_COOKIE, id, state.handoffs.ttl());

    info!("OAuth callback succeeded, tokens staged for hand-off");
    (
        jar.add(cookie),
        Redirect::temporary(state.page("/auth/callback").as_str()),
    )
        .into_response()
}

/// `GET /token-handoff`: return the staged tokens once.
pub async fn token_handoff(State(state): State<ApiState>, jar: CookieJar) -> Response {
    let staged = jar
        .get(HANDOFF_COOKIE)
        .and_then(|c| state.handoffs.take(c.value()));
    let jar = jar.remove(removal_cookie(HANDOFF_COOKIE));

    match staged {
        Some(tokens) => {
            debug!("Handing off staged tokens");
            (jar, Json(HandoffResponse::from(tokens))).into_response()
        }
        None => (
            jar,
            error_response(StatusCode::UNAUTHORIZED, "No tokens found"),
        )
            .into_response(),
    }
}

fn provider_failure(e: ProviderError) -> Response {
    let status =
        StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match &e {
        ProviderError::Config(_) => "Missing provider credentials".to_string(),
        ProviderError::Rejected { error, .. } => error.clone(),
        other => other.to_string(),
    };
    error_response(status, message)
}

/// `POST /token-refresh`: exchange a refresh token.
pub async fn token_refresh(
    State(state): State<ApiState>,
    Json(body): Json<RefreshRequest>,
) -> Response {
    let Some(refresh_token) = body.refresh_token.filter(|t| !t.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Refresh token is required");
    };

    match state
        .coordinator
        .provider()
        .refresh(&goodvibes_core::Secret::new(refresh_token))
        .await
    {
        Ok(grant) => Json(AccessTokenResponse::from(grant)).into_response(),
        Err(e) => {
            error!("Token refresh failed: {}", e);
            provider_failure(e)
        }
    }
}

/// `GET /anonymous-token`: client-credentials token for browse-only use.
pub async fn anonymous_token(State(state): State<ApiState>) -> Response {
    match state.coordinator.provider().client_credentials().await {
        Ok(grant) => Json(AccessTokenResponse::from(grant)).into_response(),
        Err(ProviderError::Config(e)) => {
            error!("Anonymous token unavailable: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing provider credentials",
            )
        }
        Err(e) => {
            error!("Anonymous token request failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get anonymous token",
            )
        }
    }
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
