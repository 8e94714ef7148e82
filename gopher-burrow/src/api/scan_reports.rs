//! Scan report submission endpoints
//!
//! `POST /scan-reports` runs ingestion on its own task so a client that
//! disconnects mid-report cancels the ingestion at the next entry boundary
//! instead of aborting a transaction half way.

use crate::db::audit::{self, AuditRow};
use crate::error::CatalogError;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use gopher_common::api::{IngestionResult, ScanReport};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

/// Response for DELETE /scan-reports/:scanner/:session
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub scanner_id: String,
    pub session_id: String,
    /// False when no ingestion of the session was in flight
    pub cancelled: bool,
}

/// Status and body for an ingestion result
///
/// A fully applied report is 200. Cancellation, failed missing detection or
/// entry errors give 207 with an `error` object next to the per-entry results.
pub fn ingestion_response(result: IngestionResult) -> Response {
    if !result.is_partial() {
        return (StatusCode::OK, Json(result)).into_response();
    }

    let error = if result.cancelled {
        json!({
            "code": "cancelled",
            "message": format!("ingestion stopped after {} entries", result.entries.len()),
            "retryable": true,
        })
    } else if let Some(failure) = &result.missing_detection_error {
        json!({
            "code": "missing-detection-failed",
            "message": format!("{}: {}", failure.code, failure.message),
            "retryable": failure.retryable,
        })
    } else {
        json!({
            "code": "entry-error",
            "message": format!("{} of {} entries failed", result.errors, result.entries.len()),
            "retryable": result
                .entries
                .iter()
                .filter_map(|e| e.error.as_ref())
                .all(|e| e.retryable),
        })
    };

    let mut body = json!(result);
    if let Some(object) = body.as_object_mut() {
        object.insert("error".to_string(), error);
    }
    (StatusCode::MULTI_STATUS, Json(body)).into_response()
}

/// POST /scan-reports
///
/// **Request:** ScanReport JSON
/// **Response:** IngestionResult (200, or 207 on a partially applied report,
/// including a report whose missing detection failed)
///
/// **Errors:**
/// - 400 `malformed-report`: body does not parse or fails structural checks
/// - 503 `storage-unavailable`: catalog busy after retries (retryable)
pub async fn submit_scan_report(
    State(state): State<AppState>,
    payload: Result<Json<ScanReport>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(report) = payload.map_err(|rejection| CatalogError::MalformedReport(rejection.body_text()))?;

    info!(
        scanner_id = %report.scanner_id,
        session_id = %report.session_id,
        entries = report.entries.len(),
        "Scan report received"
    );

    let guard = state
        .cancellation_tokens
        .register(&report.scanner_id, &report.session_id);
    let token = guard.token();
    let coordinator = state.coordinator.clone();

    // Dropping this handler drops the guard, which cancels the token
    let handle = tokio::spawn(async move { coordinator.ingest(&report, &token).await });
    let outcome = handle
        .await
        .map_err(|e| ApiError::Internal(format!("Ingestion task failed: {}", e)))?;
    guard.finish();

    match outcome {
        Ok(result) => {
            if let Some(failure) = &result.missing_detection_error {
                state
                    .record_error(format!("Missing detection failed: {}", failure.message))
                    .await;
            }
            Ok(ingestion_response(result))
        }
        Err(err) => {
            if !matches!(err, CatalogError::MalformedReport(_)) {
                state.record_error(format!("Scan report ingestion failed: {}", err)).await;
            }
            Err(err.into())
        }
    }
}

/// DELETE /scan-reports/:scanner/:session
///
/// Cancels every in-flight batch of the session. Entries already applied
/// stay applied; a cancelled report never marks files missing.
pub async fn cancel_scan_report(
    State(state): State<AppState>,
    Path((scanner_id, session_id)): Path<(String, String)>,
) -> Json<CancelResponse> {
    let cancelled = state.cancellation_tokens.cancel(&scanner_id, &session_id);
    if cancelled {
        info!(%scanner_id, %session_id, "Scan report ingestion cancelled on request");
    } else {
        warn!(%scanner_id, %session_id, "Cancel requested for a session with nothing in flight");
    }

    Json(CancelResponse {
        scanner_id,
        session_id,
        cancelled,
    })
}

/// GET /scan-reports/:scanner/:session
///
/// Audit rows of every distinct report body submitted for the session.
pub async fn get_scan_audit(
    State(state): State<AppState>,
    Path((scanner_id, session_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<AuditRow>>> {
    let mut conn = state.db.acquire().await.map_err(CatalogError::from)?;
    let rows = audit::for_session(&mut conn, &scanner_id, &session_id).await?;

    if rows.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no reports for scanner '{}' session '{}'",
            scanner_id, session_id
        )));
    }
    Ok(Json(rows))
}

/// Build scan report routes
pub fn scan_report_routes() -> Router<AppState> {
    Router::new()
        .route("/scan-reports", post(submit_scan_report))
        .route(
            "/scan-reports/:scanner_id/:session_id",
            delete(cancel_scan_report).get(get_scan_audit),
        )
}
