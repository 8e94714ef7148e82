//! gopher-burrow library interface
//!
//! The burrow receives scan reports from gatherers, keeps the canonical
//! image catalog, reconciles duplicates and manages the tag graph.
//! Exposes the engine and router for the binary and integration tests.

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sessions;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, CatalogError, CatalogResult};

use crate::catalog::CatalogStore;
use crate::config::IngestSettings;
use crate::services::{ContentSource, DuplicateReconciler, IngestionCoordinator, TagGraph};
use crate::sessions::SessionTokens;
use axum::Router;
use chrono::{DateTime, Utc};
use gopher_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Catalog connection pool
    pub db: SqlitePool,
    pub store: CatalogStore,
    pub coordinator: IngestionCoordinator,
    pub reconciler: DuplicateReconciler,
    pub tags: TagGraph,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Cancellation tokens for in-flight scan reports
    pub cancellation_tokens: SessionTokens,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        settings: &IngestSettings,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        let store = CatalogStore::new(db.clone(), settings);
        let reconciler = DuplicateReconciler::new(store.clone(), event_bus.clone());
        let tags = TagGraph::new(store.clone(), event_bus.clone());
        let coordinator = IngestionCoordinator::new(
            store.clone(),
            reconciler.clone(),
            content,
            event_bus.clone(),
            settings.trust_mode,
        );

        Self {
            db,
            store,
            coordinator,
            reconciler,
            tags,
            event_bus,
            cancellation_tokens: SessionTokens::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember a failure for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::scan_report_routes())
        .merge(api::image_routes())
        .merge(api::tag_routes())
        .merge(api::library_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
