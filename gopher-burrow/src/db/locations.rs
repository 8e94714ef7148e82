//! File location persistence
//!
//! `(scanner_id, path)` is the primary key, so a path is bound to exactly
//! one fingerprint at a time.

use super::{parse_fp, parse_opt_ts, parse_ts, ts};
use crate::error::CatalogResult;
use crate::models::{FileLocation, Observation};
use chrono::{DateTime, Utc};
use gopher_common::Fingerprint;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;

/// Location row with its bound fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub fingerprint: Fingerprint,
    pub location: FileLocation,
}

/// Presence summary of one record's locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub total: i64,
    pub present: i64,
    /// Latest `missing_since` among absent locations
    pub last_missing_since: Option<DateTime<Utc>>,
}

const SELECT_COLUMNS: &str =
    "scanner_id, path, fingerprint, last_observed, modified_at, last_session, missing_since";

fn map_row(row: &SqliteRow) -> CatalogResult<LocationRow> {
    Ok(LocationRow {
        fingerprint: parse_fp(row.get::<&str, _>("fingerprint"))?,
        location: FileLocation {
            scanner_id: row.get("scanner_id"),
            path: row.get("path"),
            last_observed: parse_ts(row.get::<&str, _>("last_observed"))?,
            modified_at: parse_ts(row.get::<&str, _>("modified_at"))?,
            last_session: row.get("last_session"),
            missing_since: parse_opt_ts(row.get("missing_since"))?,
        },
    })
}

/// Current binding of a path
pub async fn binding(
    conn: &mut SqliteConnection,
    scanner_id: &str,
    path: &str,
) -> CatalogResult<Option<LocationRow>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM locations WHERE scanner_id = ? AND path = ?",
        SELECT_COLUMNS
    ))
    .bind(scanner_id)
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(map_row).transpose()
}

/// Add or refresh the location named by an observation
///
/// Newer observations win; an observation older than the stored one only
/// leaves timestamps untouched. Clears `missing_since` when the sighting is
/// at or after the miss.
pub async fn upsert(conn: &mut SqliteConnection, obs: &Observation) -> CatalogResult<()> {
    sqlx::query(
        r#"
        INSERT INTO locations (scanner_id, path, fingerprint, last_observed, modified_at, last_session, missing_since)
        VALUES (?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT(scanner_id, path) DO UPDATE SET
            fingerprint = CASE WHEN excluded.last_observed >= locations.last_observed
                               THEN excluded.fingerprint ELSE locations.fingerprint END,
            modified_at = CASE WHEN excluded.last_observed >= locations.last_observed
                               THEN excluded.modified_at ELSE locations.modified_at END,
            last_session = CASE WHEN excluded.last_observed >= locations.last_observed
                                THEN excluded.last_session ELSE locations.last_session END,
            missing_since = CASE WHEN locations.missing_since IS NOT NULL
                                      AND excluded.last_observed >= locations.missing_since
                                 THEN NULL ELSE locations.missing_since END,
            last_observed = MAX(locations.last_observed, excluded.last_observed)
        "#,
    )
    .bind(&obs.scanner_id)
    .bind(&obs.path)
    .bind(obs.fingerprint.to_hex())
    .bind(ts(obs.observed_at))
    .bind(ts(obs.modified_at))
    .bind(&obs.session_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Flag a location absent (keeps an earlier flag)
pub async fn set_missing_since(
    conn: &mut SqliteConnection,
    scanner_id: &str,
    path: &str,
    at: DateTime<Utc>,
) -> CatalogResult<bool> {
    let result = sqlx::query(
        "UPDATE locations SET missing_since = ? WHERE scanner_id = ? AND path = ? AND missing_since IS NULL",
    )
    .bind(ts(at))
    .bind(scanner_id)
    .bind(path)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Locations of one record, ordered for stable output
pub async fn for_image(
    conn: &mut SqliteConnection,
    fingerprint: &Fingerprint,
) -> CatalogResult<Vec<FileLocation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM locations WHERE fingerprint = ? ORDER BY scanner_id, path",
        SELECT_COLUMNS
    ))
    .bind(fingerprint.to_hex())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| map_row(row).map(|r| r.location))
        .collect()
}

/// Every location a scanner owns
pub async fn for_scanner(
    conn: &mut SqliteConnection,
    scanner_id: &str,
) -> CatalogResult<Vec<LocationRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM locations WHERE scanner_id = ? ORDER BY path",
        SELECT_COLUMNS
    ))
    .bind(scanner_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(map_row).collect()
}

/// Paths a scanner reported during one session
pub async fn session_paths(
    conn: &mut SqliteConnection,
    scanner_id: &str,
    session_id: &str,
) -> CatalogResult<HashSet<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT path FROM locations WHERE scanner_id = ? AND last_session = ?")
            .bind(scanner_id)
            .bind(session_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().map(|(path,)| path).collect())
}

/// Presence summary for one record
pub async fn presence(conn: &mut SqliteConnection, fingerprint: &Fingerprint) -> CatalogResult<Presence> {
    let (total, present, last_missing): (i64, Option<i64>, Option<String>) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               SUM(CASE WHEN missing_since IS NULL THEN 1 ELSE 0 END),
               MAX(missing_since)
        FROM locations WHERE fingerprint = ?
        "#,
    )
    .bind(fingerprint.to_hex())
    .fetch_one(&mut *conn)
    .await?;

    Ok(Presence {
        total,
        present: present.unwrap_or(0),
        last_missing_since: parse_opt_ts(last_missing)?,
    })
}

/// Re-bind every location of `from` to `into`
pub async fn move_all(
    conn: &mut SqliteConnection,
    from: &Fingerprint,
    into: &Fingerprint,
) -> CatalogResult<u64> {
    let result = sqlx::query("UPDATE locations SET fingerprint = ? WHERE fingerprint = ?")
        .bind(into.to_hex())
        .bind(from.to_hex())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
