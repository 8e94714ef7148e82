//! Tag vocabulary and membership persistence
//!
//! Membership is one `image_tags` row per (image, tag) pair; both directions
//! of the graph are queries over that table.

use super::{parse_fp, ts};
use crate::error::CatalogResult;
use chrono::{DateTime, Utc};
use gopher_common::Fingerprint;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Tag with its member count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSummary {
    pub name: String,
    pub namespace: Option<String>,
    pub images: i64,
    pub created_at: String,
}

/// Create a tag on first use
pub async fn ensure(
    conn: &mut SqliteConnection,
    name: &str,
    namespace: Option<&str>,
    at: DateTime<Utc>,
) -> CatalogResult<()> {
    sqlx::query("INSERT OR IGNORE INTO tags (name, namespace, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(namespace)
        .bind(ts(at))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Add a membership (true if it was not there)
pub async fn attach(
    conn: &mut SqliteConnection,
    fingerprint: &Fingerprint,
    name: &str,
    at: DateTime<Utc>,
) -> CatalogResult<bool> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO image_tags (fingerprint, tag, attached_at) VALUES (?, ?, ?)")
            .bind(fingerprint.to_hex())
            .bind(name)
            .bind(ts(at))
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove a membership (true if it was there)
pub async fn detach(conn: &mut SqliteConnection, fingerprint: &Fingerprint, name: &str) -> CatalogResult<bool> {
    let result = sqlx::query("DELETE FROM image_tags WHERE fingerprint = ? AND tag = ?")
        .bind(fingerprint.to_hex())
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Tag names carried by one image, sorted
pub async fn tags_for(conn: &mut SqliteConnection, fingerprint: &Fingerprint) -> CatalogResult<Vec<String>> {
    let names = sqlx::query_scalar("SELECT tag FROM image_tags WHERE fingerprint = ? ORDER BY tag")
        .bind(fingerprint.to_hex())
        .fetch_all(&mut *conn)
        .await?;
    Ok(names)
}

/// Number of images carrying a tag
pub async fn count_images(conn: &mut SqliteConnection, name: &str) -> CatalogResult<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM image_tags WHERE tag = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// One page of a tag's members in fingerprint order
pub async fn images_for(
    conn: &mut SqliteConnection,
    name: &str,
    limit: i64,
    offset: i64,
) -> CatalogResult<Vec<Fingerprint>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT fingerprint FROM image_tags WHERE tag = ? ORDER BY fingerprint LIMIT ? OFFSET ?",
    )
    .bind(name)
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|fp| parse_fp(fp)).collect()
}

/// Vocabulary with member counts
pub async fn list(conn: &mut SqliteConnection) -> CatalogResult<Vec<TagSummary>> {
    let rows: Vec<(String, Option<String>, i64, String)> = sqlx::query_as(
        r#"
        SELECT t.name, t.namespace, COUNT(it.fingerprint), t.created_at
        FROM tags t LEFT JOIN image_tags it ON it.tag = t.name
        GROUP BY t.name
        ORDER BY t.name
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, namespace, images, created_at)| TagSummary {
            name,
            namespace,
            images,
            created_at,
        })
        .collect())
}

/// Copy `from`'s memberships onto `into` and drop `from`'s; returns how many were new on `into`
pub async fn move_all(
    conn: &mut SqliteConnection,
    from: &Fingerprint,
    into: &Fingerprint,
    at: DateTime<Utc>,
) -> CatalogResult<u64> {
    let added = sqlx::query(
        r#"
        INSERT OR IGNORE INTO image_tags (fingerprint, tag, attached_at)
        SELECT ?, tag, ? FROM image_tags WHERE fingerprint = ?
        "#,
    )
    .bind(into.to_hex())
    .bind(ts(at))
    .bind(from.to_hex())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM image_tags WHERE fingerprint = ?")
        .bind(from.to_hex())
        .execute(&mut *conn)
        .await?;

    Ok(added)
}

/// Tags with no members
pub async fn list_empty(conn: &mut SqliteConnection) -> CatalogResult<Vec<String>> {
    let names = sqlx::query_scalar(
        "SELECT name FROM tags t WHERE NOT EXISTS (SELECT 1 FROM image_tags it WHERE it.tag = t.name) ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}

/// Delete a tag if it still has no members
pub async fn delete_if_empty(conn: &mut SqliteConnection, name: &str) -> CatalogResult<bool> {
    let result = sqlx::query(
        "DELETE FROM tags WHERE name = ? AND NOT EXISTS (SELECT 1 FROM image_tags WHERE tag = ?)",
    )
    .bind(name)
    .bind(name)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
