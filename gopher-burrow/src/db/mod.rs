//! Database access for gopher-burrow
//!
//! SQLite catalog. Every function here takes a `&mut SqliteConnection` so the
//! catalog store can compose them inside one transaction; readers acquire a
//! pooled connection and pass it the same way.

pub mod audit;
pub mod images;
pub mod libraries;
pub mod locations;
pub mod merges;
pub mod settings;
pub mod tags;

use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, SecondsFormat, Utc};
use gopher_common::Fingerprint;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize the catalog connection pool
///
/// Creates the file if needed, enables WAL and foreign keys, sets the busy
/// timeout on every connection and creates the schema.
pub async fn init_database_pool(db_path: &Path, busy_timeout: Duration) -> CatalogResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CatalogError::StorageUnavailable(format!("create {}: {}", parent.display(), e)))?;
    }

    let newly_created = !db_path.exists();

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(busy_timeout)
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!("Initialized new database: {}", db_path.display());
    } else {
        tracing::info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory catalog (tests and tooling)
pub async fn init_memory_pool() -> CatalogResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create catalog tables if they don't exist (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> CatalogResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            fingerprint TEXT PRIMARY KEY,
            byte_size INTEGER NOT NULL,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            first_session TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('new', 'active', 'missing', 'merged')),
            merged_into TEXT REFERENCES images(fingerprint),
            absent_since TEXT,
            status_changed_at TEXT NOT NULL,
            CHECK ((status = 'merged') = (merged_into IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_images_merged_into ON images(merged_into);
        CREATE INDEX IF NOT EXISTS idx_images_status ON images(status);

        CREATE TABLE IF NOT EXISTS locations (
            scanner_id TEXT NOT NULL,
            path TEXT NOT NULL,
            fingerprint TEXT NOT NULL REFERENCES images(fingerprint),
            last_observed TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            last_session TEXT NOT NULL,
            missing_since TEXT,
            PRIMARY KEY (scanner_id, path)
        );

        CREATE INDEX IF NOT EXISTS idx_locations_fingerprint ON locations(fingerprint);

        CREATE TABLE IF NOT EXISTS tags (
            name TEXT PRIMARY KEY,
            namespace TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS image_tags (
            fingerprint TEXT NOT NULL REFERENCES images(fingerprint),
            tag TEXT NOT NULL REFERENCES tags(name),
            attached_at TEXT NOT NULL,
            PRIMARY KEY (fingerprint, tag)
        );

        CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag, fingerprint);

        CREATE TABLE IF NOT EXISTS merges (
            merge_id TEXT PRIMARY KEY,
            from_fp TEXT NOT NULL UNIQUE REFERENCES images(fingerprint),
            into_fp TEXT NOT NULL REFERENCES images(fingerprint),
            reason TEXT,
            locations_moved INTEGER NOT NULL,
            tags_moved INTEGER NOT NULL,
            merged_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scan_audit (
            scanner_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            report_digest TEXT NOT NULL,
            complete INTEGER NOT NULL,
            entry_count INTEGER NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            content_changed INTEGER NOT NULL,
            stale INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            missing_candidates INTEGER NOT NULL,
            submissions INTEGER NOT NULL DEFAULT 1,
            first_received_at TEXT NOT NULL,
            last_received_at TEXT NOT NULL,
            PRIMARY KEY (scanner_id, session_id, report_digest)
        );

        CREATE TABLE IF NOT EXISTS libraries (
            path TEXT PRIMARY KEY,
            scanner_id TEXT,
            added_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Catalog tables initialized");

    Ok(())
}

/// Fixed-width UTC text form; lexical order equals time order
pub fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp column
pub fn parse_ts(value: &str) -> CatalogResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CatalogError::Internal(format!("bad timestamp '{}' in catalog: {}", value, e)))
}

/// Parse an optional timestamp column
pub fn parse_opt_ts(value: Option<String>) -> CatalogResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

/// Parse a fingerprint column
pub fn parse_fp(value: &str) -> CatalogResult<Fingerprint> {
    value
        .parse()
        .map_err(|e| CatalogError::Internal(format!("bad fingerprint in catalog: {}", e)))
}
