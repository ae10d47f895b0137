use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::api::{self, AppState};
use super::seed::SeedSource;
use crate::config::RelayConfig;

/// Configuration for the relay server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub seed: SeedSource,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            seed: SeedSource::Builtin,
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dev_mode = state.dev_mode;
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Start the relay server and serve until Ctrl+C.
pub async fn start_server(server: ServerConfig, settings: &RelayConfig) -> Result<()> {
    let state = Arc::new(
        AppState::from_seed(
            server.seed.clone(),
            settings.simulation.clone(),
            settings.server.keep_alive(),
            server.dev_mode,
        )
        .with_context(|| format!("Failed to load seed data ({})", server.seed))?,
    );
    let transactions = state.store.snapshot().map(|t| t.len()).unwrap_or_default();
    let app = build_router(state);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        seed = %server.seed,
        transactions,
        dev_mode = server.dev_mode,
        "relay server listening"
    );
    println!("Relay running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
