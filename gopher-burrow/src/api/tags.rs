//! Tag listing endpoints

use crate::services::tag_graph::TagSummary;
use crate::services::TagPage;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for GET /tags/:tag/images
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: i64,
    pub page_size: Option<i64>,
}

fn default_page() -> i64 {
    1
}

/// GET /tags
pub async fn list_tags(State(state): State<AppState>) -> ApiResult<Json<Vec<TagSummary>>> {
    Ok(Json(state.tags.list_tags().await?))
}

/// GET /tags/:tag/images?page=N&page_size=M
///
/// Fingerprints carrying the tag. Unknown tag is an empty page.
pub async fn tag_images(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<TagPage>> {
    Ok(Json(state.tags.images_for(&tag, query.page, query.page_size).await?))
}

/// Build tag routes
pub fn tag_routes() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags))
        .route("/tags/:tag/images", get(tag_images))
}
