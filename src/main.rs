//! Stickyboard sync server.
//!
//! Authoritative backend for the live store: holds chunk collections and the
//! cursor board in memory, fans out full snapshots over websockets, and (with
//! `DATABASE_URL` set) hydrates and persists chunk records in Postgres.

mod config;
mod db;
mod routes;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::ServerConfig::from_env();

    let pool = match &config.database_url {
        Some(url) => match db::init_pool(url, config.db_max_connections).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::error!(error = %e, "database init failed");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set; chunks are kept in memory only");
            None
        }
    };

    let state = state::AppState::new(pool, &config);

    // Spawn background persistence task.
    let _persistence = services::persistence::spawn_persistence_task(state.clone(), config.flush_interval_ms);

    let app = routes::app(state);
    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = config.port, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(port = config.port, "stickyboard listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}
