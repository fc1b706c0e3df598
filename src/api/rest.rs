// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. `/health` requires no authentication.
// `/screen` and `/recommend` require a valid Bearer token checked via the
// `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::screening::ScreenRequest;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/screen", post(screen))
        .route("/api/v1/recommend", post(recommend))
        .layer(cors)
        .with_state(state)
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Deserialize)]
struct ScreenQuery {
    market: String,
    #[serde(flatten)]
    request: ScreenRequest,
}

async fn screen(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(query): Json<ScreenQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let result = match query.market.as_str() {
        "kospi" | "kosdaq" | "kr" => state.kr_screener.screen(&query.market, query.request).await,
        "us" => state.us_screener.screen(query.request).await,
        "crypto" => state.crypto_screener.screen(query.request).await,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("unknown market '{other}'") })),
            ))
        }
    };

    match result {
        Ok(screen_result) => Ok(Json(screen_result).into_response()),
        Err(e) => {
            warn!(error = %e, market = %query.market, "screen request failed");
            Err((StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": e.to_string() }))))
        }
    }
}

#[derive(Deserialize)]
struct RecommendQuery {
    market: String,
    strategy: String,
    budget: f64,
    max_positions: usize,
    #[serde(default)]
    exclude_held: bool,
    #[serde(default)]
    held_symbols: Vec<String>,
    #[serde(default)]
    screen_request: ScreenRequest,
}

async fn recommend(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(query): Json<RecommendQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let screen_result = match query.market.as_str() {
        "kospi" | "kosdaq" | "kr" => state.kr_screener.screen(&query.market, query.screen_request).await,
        "us" => state.us_screener.screen(query.screen_request).await,
        "crypto" => state.crypto_screener.screen(query.screen_request).await,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("unknown market '{other}'") })),
            ))
        }
    };

    let screen_result = screen_result.map_err(|e| {
        (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": e.to_string() })))
    })?;

    let universe: Vec<crate::screening::Candidate> = screen_result
        .results
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect();

    let result = state
        .recommender
        .recommend(
            &query.market,
            &query.strategy,
            query.budget,
            query.max_positions,
            query.exclude_held,
            &query.held_symbols,
            universe,
        )
        .await;

    match result {
        Ok(recommendation) => Ok(Json(recommendation).into_response()),
        Err(e) => Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() })))),
    }
}
