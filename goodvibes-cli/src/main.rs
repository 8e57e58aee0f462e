//! Good Vibes CLI
//!
//! Drives a playback session against a running Good Vibes server.
//!
//! # Usage
//!
//! ```bash
//! # Resume a stored login, or fall back to browse-only
//! goodvibes status
//!
//! # Print the page that starts a browser login
//! goodvibes login-url
//!
//! # Pick up the tokens staged by the browser login
//! goodvibes callback --handoff-id <id from the handoff_id cookie>
//!
//! # Keep the session running and print state changes
//! goodvibes watch
//! ```

mod client;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use goodvibes_core::{Secret, SecretStore, Session, SessionState, TokenStore, UserTokens};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::FmtSubscriber;

use client::{Client, StoreOptions};

#[derive(Parser)]
#[command(name = "goodvibes")]
#[command(about = "Playback session client for Good Vibes")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base URL of the Good Vibes server
    #[arg(
        long,
        global = true,
        env = "GOODVIBES_SERVER",
        default_value = "http://localhost:3000"
    )]
    server: String,

    /// Keep tokens in this file instead of the default location
    #[arg(long, global = true)]
    store_file: Option<std::path::PathBuf>,

    /// Do not use the OS keyring
    #[arg(long, global = true)]
    no_keyring: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume the stored session and report its state
    Status,

    /// Print the URL that starts a browser login
    LoginUrl,

    /// Collect the tokens staged by the server after a browser login
    Callback {
        /// Value of the `handoff_id` cookie set by the server
        #[arg(long)]
        handoff_id: Option<String>,
    },

    /// Log in with a token pair obtained elsewhere
    Import {
        /// Access token
        access_token: String,

        /// Refresh token
        refresh_token: String,
    },

    /// Log out and forget the stored tokens
    Logout,

    /// Fetch a browse-only access token
    AnonymousToken {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resume the session and print every state change until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    let handoff_id = match &cli.command {
        Commands::Callback { handoff_id } => handoff_id.as_deref(),
        _ => None,
    };
    let client = Client::new(&cli.server, handoff_id)?;
    let store = StoreOptions {
        file: cli.store_file.clone(),
        no_keyring: cli.no_keyring,
    }
    .open();
    debug!("Using server {}", client.server());

    match cli.command {
        Commands::Status => status(&client, &store).await,
        Commands::LoginUrl => {
            println!("{}", client.login_url());
            Ok(())
        }
        Commands::Callback { .. } => callback(&client, &store).await,
        Commands::Import {
            access_token,
            refresh_token,
        } => import(&client, &store, access_token, refresh_token).await,
        Commands::Logout => logout(&client, &store).await,
        Commands::AnonymousToken { format } => anonymous_token(&client, &format).await,
        Commands::Watch => watch(&client, &store).await,
    }
}

fn report(session: &Session) {
    println!("State: {}", session.state());
    if let Some(id) = session.active_device_id() {
        println!("  Device: {}", id);
    }
    if session.has_refresh_timer() {
        println!("  Refresh: scheduled");
    }
}

async fn status(client: &Client, store: &Arc<dyn SecretStore>) -> Result<()> {
    let session = client.session(store.clone());
    session.check_status().await;
    report(&session);
    session.shutdown();
    Ok(())
}

async fn callback(client: &Client, store: &Arc<dyn SecretStore>) -> Result<()> {
    let session = client.session(store.clone());
    let result = session.process_auth_callback().await;
    report(&session);
    session.shutdown();
    result?;
    Ok(())
}

async fn import(
    client: &Client,
    store: &Arc<dyn SecretStore>,
    access_token: String,
    refresh_token: String,
) -> Result<()> {
    let tokens = UserTokens {
        access_token: Some(Secret::new(access_token)),
        refresh_token: Some(Secret::new(refresh_token)),
    };

    // Staged locally, so the callback path picks it up without the server
    let staging = TokenStore::new(Box::new(store.clone()));
    staging.stage_handoff(&tokens, None).await?;

    callback(client, store).await
}

async fn logout(client: &Client, store: &Arc<dyn SecretStore>) -> Result<()> {
    let session = client.session(store.clone());
    session.logout().await;
    report(&session);
    Ok(())
}

async fn anonymous_token(client: &Client, format: &str) -> Result<()> {
    let credential = client.anonymous().get_anonymous_token().await?;
    let expires_at = credential.expires_at.map(|t| t.to_rfc3339());

    match format {
        "json" => {
            let output = serde_json::json!({
                "access_token": credential.access_token.expose(),
                "expires_at": expires_at,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "text" => {
            println!("{}", credential.access_token.expose());
        }
        other => bail!("Unknown output format {:?}", other),
    }
    Ok(())
}

async fn watch(client: &Client, store: &Arc<dyn SecretStore>) -> Result<()> {
    let session = client.session(store.clone());
    let mut states = session.subscribe();

    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("State: {}", state);
        }
    });

    let state = session.check_status().await;
    if state == SessionState::LoggedOut {
        println!("Not logged in; open {}", client.login_url());
    }
    report(&session);

    info!("Watching session. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    session.shutdown();
    printer.abort();
    Ok(())
}
