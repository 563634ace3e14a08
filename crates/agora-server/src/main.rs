//! # agora-server
//!
//! Forum chat server.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws?nickname=...`) where logged-in users chat
//!   in the public room and privately, with live presence
//! - **Notifications** for private messages that arrived while the receiver
//!   was away
//! - **REST API** (axum) for health checks, message history, the user
//!   directory and notification housekeeping
//! - **SQLite persistence** of users, chats, presence and notifications

mod api;
mod config;
mod error;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use agora_hub::Hub;
use agora_store::SqliteGateway;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agora_server=debug,agora_hub=debug")),
        )
        .init();

    info!("Starting Agora server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and build the hub
    // -----------------------------------------------------------------------
    let gateway = SqliteGateway::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let hub = Hub::new(Arc::new(gateway), config.hub_config());

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
