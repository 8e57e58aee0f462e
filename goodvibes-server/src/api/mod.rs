//! HTTP API of the handshake server.
//!
//! - `GET /login-start` - start the authorization-code flow
//! - `GET /oauth-callback` - provider redirect target
//! - `GET /token-handoff` - one-time pickup of the login tokens
//! - `POST /token-refresh` - refresh a user access token
//! - `GET /anonymous-token` - client-credentials token
//! - `GET /health`

pub mod handlers;
pub mod server;
pub mod types;

pub use handlers::{ApiState, HANDOFF_COOKIE, STATE_COOKIE};
pub use server::{ServerHandle, make_router, start_server};
pub use types::*;
