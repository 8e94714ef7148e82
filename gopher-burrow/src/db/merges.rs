//! Merge history persistence

use super::{parse_fp, parse_ts, ts};
use crate::error::CatalogResult;
use crate::models::MergeRecord;
use gopher_common::Fingerprint;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

fn map_row(row: &SqliteRow) -> CatalogResult<MergeRecord> {
    Ok(MergeRecord {
        merge_id: row.get("merge_id"),
        from: parse_fp(row.get::<&str, _>("from_fp"))?,
        into: parse_fp(row.get::<&str, _>("into_fp"))?,
        reason: row.get("reason"),
        locations_moved: row.get::<i64, _>("locations_moved") as u64,
        tags_moved: row.get::<i64, _>("tags_moved") as u64,
        merged_at: parse_ts(row.get::<&str, _>("merged_at"))?,
    })
}

pub async fn insert(conn: &mut SqliteConnection, merge: &MergeRecord) -> CatalogResult<()> {
    sqlx::query(
        r#"
        INSERT INTO merges (merge_id, from_fp, into_fp, reason, locations_moved, tags_moved, merged_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&merge.merge_id)
    .bind(merge.from.to_hex())
    .bind(merge.into.to_hex())
    .bind(&merge.reason)
    .bind(merge.locations_moved as i64)
    .bind(merge.tags_moved as i64)
    .bind(ts(merge.merged_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Merges a record took part in, oldest first
pub async fn history(conn: &mut SqliteConnection, fingerprint: &Fingerprint) -> CatalogResult<Vec<MergeRecord>> {
    let rows = sqlx::query("SELECT * FROM merges WHERE into_fp = ? OR from_fp = ? ORDER BY merged_at, merge_id")
        .bind(fingerprint.to_hex())
        .bind(fingerprint.to_hex())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(map_row).collect()
}
