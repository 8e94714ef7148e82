//! Runtime settings endpoints

use crate::db::settings;
use crate::error::CatalogError;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ScanIntervalRequest {
    /// Minutes between gatherer scans (1..=32767)
    pub interval: i64,
}

#[derive(Debug, Serialize)]
pub struct ScanIntervalResponse {
    pub interval: u16,
}

/// GET /settings/scan-interval
pub async fn get_scan_interval(State(state): State<AppState>) -> ApiResult<Json<ScanIntervalResponse>> {
    let mut conn = state.db.acquire().await.map_err(CatalogError::from)?;
    let interval = settings::scan_interval(&mut conn).await?;
    Ok(Json(ScanIntervalResponse { interval }))
}

/// POST /settings/scan-interval
///
/// **Request:** `{"interval": 30}`
/// **Errors:** 400 `bad-request` outside 1..=32767
pub async fn set_scan_interval(
    State(state): State<AppState>,
    payload: Result<Json<ScanIntervalRequest>, JsonRejection>,
) -> ApiResult<Json<ScanIntervalResponse>> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let mut conn = state.db.acquire().await.map_err(CatalogError::from)?;
    let interval = settings::set_scan_interval(&mut conn, request.interval).await?;
    info!("Scan interval set to {} minutes", interval);
    Ok(Json(ScanIntervalResponse { interval }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route(
        "/settings/scan-interval",
        get(get_scan_interval).post(set_scan_interval),
    )
}
