//! Image endpoints: records, locations, merges and tag edits

use super::parse_fingerprint;
use crate::models::{FileLocation, ImageRecord, MergeRecord};
use crate::services::{MergeOutcome, TagChange};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use gopher_common::api::{MergeRequest, TagRequest};
use tracing::info;

/// GET /images/:fingerprint
///
/// A merged fingerprint answers with its survivor's record.
pub async fn get_image(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<ImageRecord>> {
    let fp = parse_fingerprint(&fingerprint)?;
    state
        .store
        .get_resolved(&fp)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("image {}", fp)))
}

/// GET /images/:fingerprint/locations
pub async fn get_image_locations(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<Vec<FileLocation>>> {
    let fp = parse_fingerprint(&fingerprint)?;
    let survivor = state
        .store
        .resolve(&fp)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image {}", fp)))?;
    Ok(Json(state.store.list_locations(&survivor).await?))
}

/// GET /images/:fingerprint/merges
pub async fn get_image_merges(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<Vec<MergeRecord>>> {
    let fp = parse_fingerprint(&fingerprint)?;
    Ok(Json(state.reconciler.merge_history(&fp).await?))
}

/// POST /images/:fingerprint/tags
///
/// **Request:** `{"tag": "location:paris"}`
/// **Response:** TagChange; `changed` is false when the tag was already attached
pub async fn attach_tag(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    payload: Result<Json<TagRequest>, JsonRejection>,
) -> ApiResult<Json<TagChange>> {
    let fp = parse_fingerprint(&fingerprint)?;
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.tags.attach(&fp, &request.tag).await?))
}

/// DELETE /images/:fingerprint/tags/:tag
pub async fn detach_tag(
    State(state): State<AppState>,
    Path((fingerprint, tag)): Path<(String, String)>,
) -> ApiResult<Json<TagChange>> {
    let fp = parse_fingerprint(&fingerprint)?;
    Ok(Json(state.tags.detach(&fp, &tag).await?))
}

/// POST /images/merge
///
/// **Request:** `{"from": "<hex>", "to": "<hex>", "reason": "..."}`
/// **Response:** MergeOutcome (`merged` with the history row, or `already-merged`)
///
/// **Errors:**
/// - 404 `not-found`: either fingerprint unknown
/// - 409 `conflict`: `from` already merged into a different survivor
/// - 422 `self-merge` / `cycle-detected`
pub async fn merge_images(
    State(state): State<AppState>,
    payload: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<Json<MergeOutcome>> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    info!(from = %request.from, to = %request.to, "Merge requested");
    let outcome = state
        .reconciler
        .merge(request.from, request.to, request.reason)
        .await?;
    Ok(Json(outcome))
}

/// Build image routes
pub fn image_routes() -> Router<AppState> {
    Router::new()
        .route("/images/merge", post(merge_images))
        .route("/images/:fingerprint", get(get_image))
        .route("/images/:fingerprint/locations", get(get_image_locations))
        .route("/images/:fingerprint/merges", get(get_image_merges))
        .route("/images/:fingerprint/tags", post(attach_tag))
        .route("/images/:fingerprint/tags/:tag", delete(detach_tag))
}
