// =============================================================================
// Market-Data Screener — Main Entry Point
// =============================================================================
//
// Boots the rate governor, shared cache, token manager, provider adapters and
// the three screening pipelines, then serves the REST API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod errors;
mod indicators;
mod providers;
mod rate_limiter;
mod recommender;
mod runtime_config;
mod screening;
mod token;
mod types;

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("market-data screener starting up");

    // ── 1. Load config ───────────────────────────────────────────────────
    let config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    info!(
        redis_url = %config.redis_url,
        enrichment_concurrency = config.enrichment_concurrency,
        "runtime config loaded"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config.clone()).await);

    // ── 3. Start the API server ──────────────────────────────────────────
    let bind_addr = std::env::var("SCREENER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let app = api::rest::router(state.clone());

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("screener running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = state.config.save("runtime_config.json") {
        warn!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("screener shut down complete.");
    Ok(())
}
