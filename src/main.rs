//! LMS REST Bridge
//!
//! Exposes a Logitech Media Server's CLI (TCP 9090) as a small JSON REST API.

use lms_rest_bridge::adapters::lms::{Connection, LmsController};
use lms_rest_bridge::{api, config};

use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lms_rest_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting LMS REST Bridge v{} ({})",
        env!("LMSB_VERSION"),
        env!("LMSB_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, LMS CLI: {}:{}",
        config.port,
        config.lms.host,
        config.lms.port
    );

    let connection = Connection::tcp(
        config.lms.host.clone(),
        config.lms.port,
        config.lms.connect_timeout(),
        config.lms.io_timeout(),
    );
    let lms = LmsController::new(connection, config.controller_options());

    // The server still starts on failure so /healthcheck can report it
    match lms.connect().await {
        Ok(()) => match lms.refresh_players().await {
            Ok(players) => tracing::info!("Found {} LMS players", players.len().saturating_sub(1)),
            Err(e) => tracing::warn!("Failed to load LMS players: {}", e),
        },
        Err(e) => tracing::warn!("Failed to connect to LMS: {}", e),
    }

    match lms.default_player() {
        Some(name) => {
            if let Err(e) = lms.default_player_native() {
                tracing::warn!("Default player '{}' is not registered: {}", name, e);
            }
        }
        None => tracing::info!("No default player configured"),
    }

    let app = api::router(api::AppState::new(lms));

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
