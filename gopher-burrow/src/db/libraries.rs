//! Library base paths registered for gatherers

use super::ts;
use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Library {
    pub path: String,
    pub scanner_id: Option<String>,
    pub added_at: String,
}

pub async fn list(conn: &mut SqliteConnection) -> CatalogResult<Vec<Library>> {
    let rows = sqlx::query_as::<_, Library>("SELECT path, scanner_id, added_at FROM libraries ORDER BY path")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub async fn exists(conn: &mut SqliteConnection, path: &str) -> CatalogResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM libraries WHERE path = ?")
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Register a base path; an already registered path is a `Conflict`
pub async fn add(
    conn: &mut SqliteConnection,
    path: &str,
    scanner_id: Option<&str>,
    at: DateTime<Utc>,
) -> CatalogResult<Library> {
    let result = sqlx::query("INSERT OR IGNORE INTO libraries (path, scanner_id, added_at) VALUES (?, ?, ?)")
        .bind(path)
        .bind(scanner_id)
        .bind(ts(at))
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CatalogError::Conflict(format!("library '{}' already registered", path)));
    }

    Ok(Library {
        path: path.to_string(),
        scanner_id: scanner_id.map(str::to_string),
        added_at: ts(at),
    })
}
