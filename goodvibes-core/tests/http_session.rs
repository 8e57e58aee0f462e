//! End-to-end session tests over HTTP.
//!
//! A wiremock server stands in for the handshake server's token endpoints;
//! the session runs on [`HttpAuthBackend`] and the headless runtime.

use goodvibes_core::{
    FileStore, HeadlessRuntime, HttpAuthBackend, Session, SessionState, TokenStore, UserTokens,
};
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

fn grant(access_token: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "expires_in": 3600,
        "token_type": "Bearer"
    })
}

fn session(server: &MockServer, store: TokenStore) -> Session {
    let backend = Arc::new(HttpAuthBackend::new(&server.uri()).unwrap());
    Session::builder(backend, Arc::new(HeadlessRuntime::new()), store).build()
}

#[tokio::test]
async fn test_stored_session_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token-refresh"))
        .and(body_json(serde_json::json!({"refreshToken": "persisted-refresh"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("refreshed")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("tokens.json");

    // First run: log in and persist.
    {
        let store = TokenStore::new(Box::new(FileStore::open(file.clone()).unwrap()));
        let first = session(&server, store);
        first
            .set_logged_in(UserTokens::new("initial", "persisted-refresh"))
            .await
            .unwrap();
        assert_eq!(first.state(), SessionState::LoggedIn);
        first.shutdown();
    }

    // Second run: resume from disk.
    let store = TokenStore::new(Box::new(FileStore::open(file).unwrap()));
    let second = session(&server, store);

    assert_eq!(second.check_status().await, SessionState::LoggedIn);
    assert!(second.active_device_id().is_some());
    assert!(second.has_refresh_timer());
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_anonymous() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token-refresh"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_grant"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/anonymous-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("anon")))
        .expect(1)
        .mount(&server)
        .await;

    let store = TokenStore::new(Box::new(goodvibes_core::MemoryStore::new()));
    store
        .persist_user_tokens(&UserTokens::new("old", "revoked"))
        .await
        .unwrap();
    let session = session(&server, store);

    assert_eq!(session.check_status().await, SessionState::BrowseOnly);
    assert_eq!(session.current_access_token().unwrap().expose(), "anon");
    assert!(!session.has_refresh_timer());
}

#[tokio::test]
async fn test_unconfigured_server_logs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/anonymous-token"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({"error": "Missing provider credentials"})),
        )
        .mount(&server)
        .await;

    let session = session(
        &server,
        TokenStore::new(Box::new(goodvibes_core::MemoryStore::new())),
    );

    assert_eq!(session.check_status().await, SessionState::LoggedOut);
    assert!(session.active_device_id().is_none());
}

#[tokio::test]
async fn test_auth_callback_reads_server_handoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token-handoff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "handed-access",
            "refresh_token": "handed-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("device-access")))
        .mount(&server)
        .await;

    let session = session(
        &server,
        TokenStore::new(Box::new(goodvibes_core::MemoryStore::new())),
    );

    session.process_auth_callback().await.unwrap();

    assert_eq!(session.state(), SessionState::LoggedIn);
    let tokens = session.user_tokens().unwrap();
    assert_eq!(tokens.refresh_token.unwrap().expose(), "handed-refresh");
}
