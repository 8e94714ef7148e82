//! Library base path endpoints
//!
//! Gatherers read the registered base paths to know what to walk.

use crate::db::libraries::{self, Library};
use crate::error::CatalogError;
use crate::services::coordinator::is_absolute_path;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LibraryRequest {
    pub path: String,
    /// Gatherer that should scan the path; any gatherer when absent
    #[serde(default)]
    pub scanner_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub path: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Normalized form of a base path (no trailing separator)
fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    let stripped = trimmed.trim_end_matches(['/', '\\']);
    if stripped.is_empty() {
        trimmed.chars().take(1).collect()
    } else {
        stripped.to_string()
    }
}

fn contains(base: &str, path: &str) -> bool {
    path == base
        || path
            .strip_prefix(base)
            .map(|rest| rest.starts_with('/') || rest.starts_with('\\') || base.ends_with('/'))
            .unwrap_or(false)
}

/// Why a path cannot be registered next to `existing`, if any
pub fn rejection_reason(path: &str, existing: &[Library]) -> Option<String> {
    if path.is_empty() {
        return Some("path is empty".to_string());
    }
    if !is_absolute_path(path) {
        return Some(format!("'{}' is not an absolute path", path));
    }
    for library in existing {
        if library.path == path {
            return Some(format!("'{}' is already registered", path));
        }
        if contains(&library.path, path) {
            return Some(format!("'{}' is inside library '{}'", path, library.path));
        }
        if contains(path, &library.path) {
            return Some(format!("'{}' contains library '{}'", path, library.path));
        }
    }
    None
}

/// GET /libraries
pub async fn list_libraries(State(state): State<AppState>) -> ApiResult<Json<Vec<Library>>> {
    let mut conn = state.db.acquire().await.map_err(CatalogError::from)?;
    Ok(Json(libraries::list(&mut conn).await?))
}

/// POST /libraries/validate
///
/// Checks a path without registering it.
pub async fn validate_library(
    State(state): State<AppState>,
    payload: Result<Json<LibraryRequest>, JsonRejection>,
) -> ApiResult<Json<ValidateResponse>> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let path = normalize(&request.path);

    let mut conn = state.db.acquire().await.map_err(CatalogError::from)?;
    let existing = libraries::list(&mut conn).await?;
    let reason = rejection_reason(&path, &existing);

    Ok(Json(ValidateResponse {
        path,
        valid: reason.is_none(),
        reason,
    }))
}

/// POST /libraries
///
/// **Errors:**
/// - 400 Bad Request: relative path or nested in another library
/// - 409 Conflict: path already registered
pub async fn add_library(
    State(state): State<AppState>,
    payload: Result<Json<LibraryRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Library>)> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let path = normalize(&request.path);

    let mut conn = state.db.acquire().await.map_err(CatalogError::from)?;
    if libraries::exists(&mut conn, &path).await? {
        return Err(ApiError::Conflict(format!("library '{}' already registered", path)));
    }
    let existing = libraries::list(&mut conn).await?;
    if let Some(reason) = rejection_reason(&path, &existing) {
        return Err(ApiError::BadRequest(reason));
    }

    let library = libraries::add(&mut conn, &path, request.scanner_id.as_deref(), Utc::now()).await?;
    info!(path = %library.path, scanner_id = ?library.scanner_id, "Library registered");
    Ok((StatusCode::CREATED, Json(library)))
}

/// Build library routes
pub fn library_routes() -> Router<AppState> {
    Router::new()
        .route("/libraries", get(list_libraries).post(add_library))
        .route("/libraries/validate", post(validate_library))
}
