//! Scan report audit trail
//!
//! One row per distinct report body per session; resubmission of an
//! identical body only bumps `submissions` and `last_received_at`.

use super::ts;
use crate::error::CatalogResult;
use chrono::{DateTime, Utc};
use gopher_common::api::IngestionResult;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Audit row for one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditRow {
    pub scanner_id: String,
    pub session_id: String,
    pub report_digest: String,
    pub complete: bool,
    pub entry_count: i64,
    pub created: i64,
    pub updated: i64,
    pub content_changed: i64,
    pub stale: i64,
    pub errors: i64,
    pub missing_candidates: i64,
    pub submissions: i64,
    pub first_received_at: String,
    pub last_received_at: String,
}

/// Record the outcome of applying a report
pub async fn record(
    conn: &mut SqliteConnection,
    digest: &str,
    complete: bool,
    result: &IngestionResult,
    received_at: DateTime<Utc>,
) -> CatalogResult<()> {
    sqlx::query(
        r#"
        INSERT INTO scan_audit (scanner_id, session_id, report_digest, complete, entry_count,
                                created, updated, content_changed, stale, errors, missing_candidates,
                                submissions, first_received_at, last_received_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(scanner_id, session_id, report_digest) DO UPDATE SET
            submissions = scan_audit.submissions + 1,
            last_received_at = excluded.last_received_at,
            errors = excluded.errors
        "#,
    )
    .bind(&result.scanner_id)
    .bind(&result.session_id)
    .bind(digest)
    .bind(complete)
    .bind(result.entries.len() as i64)
    .bind(result.created as i64)
    .bind(result.updated as i64)
    .bind(result.content_changed as i64)
    .bind(result.stale as i64)
    .bind(result.errors as i64)
    .bind(result.missing_candidates as i64)
    .bind(ts(received_at))
    .bind(ts(received_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Audit rows of one scanner session, oldest first
pub async fn for_session(
    conn: &mut SqliteConnection,
    scanner_id: &str,
    session_id: &str,
) -> CatalogResult<Vec<AuditRow>> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT * FROM scan_audit WHERE scanner_id = ? AND session_id = ? ORDER BY first_received_at",
    )
    .bind(scanner_id)
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
