//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::models::CatalogStats;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("gopher-burrow")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Scan sessions currently being ingested
    pub active_sessions: usize,
    /// Record counts; absent when the catalog cannot be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogStats>,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
///
/// Reports uptime, catalog counts and the last recorded error. A catalog
/// that cannot be read turns the status to "degraded" instead of failing.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, catalog) = match state.store.stats().await {
        Ok(stats) => ("ok", Some(stats)),
        Err(e) => {
            tracing::warn!("Health check could not read catalog stats: {}", e);
            ("degraded", None)
        }
    };

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: status.to_string(),
        module: "gopher-burrow".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        active_sessions: state.cancellation_tokens.active_sessions(),
        catalog,
        last_error,
    })
}

/// Build health check routes
///
/// `/health/status` is the path gatherers probe before scanning.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/status", get(health_check))
}
