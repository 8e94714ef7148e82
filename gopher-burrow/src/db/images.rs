//! Image record persistence

use super::{parse_fp, parse_opt_ts, parse_ts, ts};
use crate::error::{CatalogError, CatalogResult};
use crate::models::{CatalogStats, ImageStatus, Observation};
use chrono::{DateTime, Utc};
use gopher_common::Fingerprint;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// `images` row without locations and tags
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRow {
    pub fingerprint: Fingerprint,
    pub byte_size: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub first_session: String,
    pub status: ImageStatus,
    pub absent_since: Option<DateTime<Utc>>,
}

const SELECT_COLUMNS: &str = "fingerprint, byte_size, first_seen, last_seen, first_session, status, merged_into, absent_since";

fn map_row(row: &SqliteRow) -> CatalogResult<ImageRow> {
    let fingerprint = parse_fp(row.get::<&str, _>("fingerprint"))?;
    let merged_into = row
        .get::<Option<String>, _>("merged_into")
        .as_deref()
        .map(parse_fp)
        .transpose()?;
    let status_text: String = row.get("status");
    let status = ImageStatus::from_columns(&status_text, merged_into).ok_or_else(|| {
        CatalogError::Internal(format!("bad status '{}' for {}", status_text, fingerprint))
    })?;

    Ok(ImageRow {
        fingerprint,
        byte_size: row.get::<i64, _>("byte_size") as u64,
        first_seen: parse_ts(row.get::<&str, _>("first_seen"))?,
        last_seen: parse_ts(row.get::<&str, _>("last_seen"))?,
        first_session: row.get("first_session"),
        status,
        absent_since: parse_opt_ts(row.get("absent_since"))?,
    })
}

/// Status after a sighting by `session_id`
///
/// A record stays `new` while only its creating session reports it.
/// Sightings never revive a merged record; callers resolve merges first.
pub fn sighted_status(current: ImageStatus, first_session: &str, session_id: &str) -> ImageStatus {
    match current {
        ImageStatus::MergedInto(target) => ImageStatus::MergedInto(target),
        ImageStatus::New if first_session == session_id => ImageStatus::New,
        _ => ImageStatus::Active,
    }
}

/// Load one image row
pub async fn load(conn: &mut SqliteConnection, fingerprint: &Fingerprint) -> CatalogResult<Option<ImageRow>> {
    let row = sqlx::query(&format!("SELECT {} FROM images WHERE fingerprint = ?", SELECT_COLUMNS))
        .bind(fingerprint.to_hex())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(map_row).transpose()
}

/// Insert a record for a first sighting
pub async fn insert(conn: &mut SqliteConnection, obs: &Observation) -> CatalogResult<ImageRow> {
    sqlx::query(
        r#"
        INSERT INTO images (fingerprint, byte_size, first_seen, last_seen, first_session,
                            status, merged_into, absent_since, status_changed_at)
        VALUES (?, ?, ?, ?, ?, 'new', NULL, NULL, ?)
        "#,
    )
    .bind(obs.fingerprint.to_hex())
    .bind(obs.byte_size as i64)
    .bind(ts(obs.observed_at))
    .bind(ts(obs.observed_at))
    .bind(&obs.session_id)
    .bind(ts(obs.observed_at))
    .execute(&mut *conn)
    .await?;

    Ok(ImageRow {
        fingerprint: obs.fingerprint,
        byte_size: obs.byte_size,
        first_seen: obs.observed_at,
        last_seen: obs.observed_at,
        first_session: obs.session_id.clone(),
        status: ImageStatus::New,
        absent_since: None,
    })
}

/// Fold a sighting into an existing record
///
/// first/last seen merge with min/max so replays and reordered reports
/// converge on the same values.
pub async fn record_sighting(
    conn: &mut SqliteConnection,
    current: &ImageRow,
    obs: &Observation,
) -> CatalogResult<ImageRow> {
    let mut next = current.clone();
    next.first_seen = current.first_seen.min(obs.observed_at);
    next.last_seen = current.last_seen.max(obs.observed_at);
    next.status = sighted_status(current.status, &current.first_session, &obs.session_id);
    next.absent_since = None;

    if next == *current {
        return Ok(next);
    }

    let status_changed = next.status != current.status;
    sqlx::query(
        r#"
        UPDATE images
        SET first_seen = ?, last_seen = ?, status = ?, absent_since = NULL,
            status_changed_at = CASE WHEN ? THEN ? ELSE status_changed_at END
        WHERE fingerprint = ?
        "#,
    )
    .bind(ts(next.first_seen))
    .bind(ts(next.last_seen))
    .bind(next.status.as_column())
    .bind(status_changed)
    .bind(ts(obs.observed_at))
    .bind(current.fingerprint.to_hex())
    .execute(&mut *conn)
    .await?;

    Ok(next)
}

/// Set presence columns after location changes
pub async fn set_presence(
    conn: &mut SqliteConnection,
    fingerprint: &Fingerprint,
    status: ImageStatus,
    absent_since: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> CatalogResult<()> {
    sqlx::query(
        r#"
        UPDATE images
        SET status_changed_at = CASE WHEN status != ? THEN ? ELSE status_changed_at END,
            status = ?, absent_since = ?
        WHERE fingerprint = ? AND status != 'merged'
        "#,
    )
    .bind(status.as_column())
    .bind(ts(at))
    .bind(status.as_column())
    .bind(absent_since.map(ts))
    .bind(fingerprint.to_hex())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Widen a survivor's first/last seen to cover an absorbed record
pub async fn widen_seen(
    conn: &mut SqliteConnection,
    fingerprint: &Fingerprint,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
) -> CatalogResult<()> {
    sqlx::query(
        "UPDATE images SET first_seen = MIN(first_seen, ?), last_seen = MAX(last_seen, ?) WHERE fingerprint = ?",
    )
    .bind(ts(first_seen))
    .bind(ts(last_seen))
    .bind(fingerprint.to_hex())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mark `from` as merged into `into`
pub async fn set_merged(
    conn: &mut SqliteConnection,
    from: &Fingerprint,
    into: &Fingerprint,
    at: DateTime<Utc>,
) -> CatalogResult<()> {
    sqlx::query(
        "UPDATE images SET status = 'merged', merged_into = ?, absent_since = NULL, status_changed_at = ? WHERE fingerprint = ?",
    )
    .bind(into.to_hex())
    .bind(ts(at))
    .bind(from.to_hex())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Point every record forwarding to `old_target` at `new_target`
pub async fn reforward(
    conn: &mut SqliteConnection,
    old_target: &Fingerprint,
    new_target: &Fingerprint,
) -> CatalogResult<u64> {
    let result = sqlx::query("UPDATE images SET merged_into = ? WHERE merged_into = ?")
        .bind(new_target.to_hex())
        .bind(old_target.to_hex())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Point one merged record directly at `target` (path compression)
pub async fn set_forward(
    conn: &mut SqliteConnection,
    fingerprint: &Fingerprint,
    target: &Fingerprint,
) -> CatalogResult<bool> {
    let result = sqlx::query("UPDATE images SET merged_into = ? WHERE fingerprint = ? AND status = 'merged'")
        .bind(target.to_hex())
        .bind(fingerprint.to_hex())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Forwarding pointer of one record (outer None = unknown record)
pub async fn forward_of(
    conn: &mut SqliteConnection,
    fingerprint: &Fingerprint,
) -> CatalogResult<Option<Option<Fingerprint>>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT merged_into FROM images WHERE fingerprint = ?")
            .bind(fingerprint.to_hex())
            .fetch_optional(&mut *conn)
            .await?;

    match row {
        None => Ok(None),
        Some((None,)) => Ok(Some(None)),
        Some((Some(target),)) => Ok(Some(Some(parse_fp(&target)?))),
    }
}

/// Records not yet missing whose presence lapsed before `cutoff`
pub async fn list_absent_before(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
) -> CatalogResult<Vec<Fingerprint>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT fingerprint FROM images WHERE status IN ('new', 'active') AND absent_since IS NOT NULL AND absent_since <= ? ORDER BY fingerprint",
    )
    .bind(ts(cutoff))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|(fp,)| parse_fp(fp)).collect()
}

/// Missing records older than `cutoff` that nothing forwards to
pub async fn list_purgeable(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
) -> CatalogResult<Vec<Fingerprint>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT i.fingerprint FROM images i
        WHERE i.status = 'missing' AND i.status_changed_at <= ?
          AND NOT EXISTS (SELECT 1 FROM images f WHERE f.merged_into = i.fingerprint)
          AND NOT EXISTS (SELECT 1 FROM merges m WHERE m.into_fp = i.fingerprint)
        ORDER BY i.fingerprint
        "#,
    )
    .bind(ts(cutoff))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|(fp,)| parse_fp(fp)).collect()
}

/// Delete a record with its locations and memberships
pub async fn delete(conn: &mut SqliteConnection, fingerprint: &Fingerprint) -> CatalogResult<()> {
    let hex = fingerprint.to_hex();
    sqlx::query("DELETE FROM image_tags WHERE fingerprint = ?")
        .bind(&hex)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM locations WHERE fingerprint = ?")
        .bind(&hex)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM images WHERE fingerprint = ? AND status = 'missing'")
        .bind(&hex)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Record and location counts
pub async fn stats(conn: &mut SqliteConnection) -> CatalogResult<CatalogStats> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM images GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;

    let mut stats = CatalogStats::default();
    for (status, count) in rows {
        match status.as_str() {
            "new" => stats.images_new = count,
            "active" => stats.images_active = count,
            "missing" => stats.images_missing = count,
            "merged" => stats.images_merged = count,
            _ => {}
        }
    }

    stats.locations = sqlx::query_scalar("SELECT COUNT(*) FROM locations")
        .fetch_one(&mut *conn)
        .await?;
    stats.tags = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(&mut *conn)
        .await?;

    Ok(stats)
}
