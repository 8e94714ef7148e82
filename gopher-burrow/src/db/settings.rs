//! Key/value settings
//!
//! Runtime-adjustable values the gatherers read back, such as the scan
//! interval. Static configuration lives in the TOML file instead.

use crate::error::{CatalogError, CatalogResult};
use sqlx::SqliteConnection;

pub const SCAN_INTERVAL_KEY: &str = "scan_interval";

/// Minutes between gatherer scans when never set
pub const DEFAULT_SCAN_INTERVAL: u16 = 60;

pub async fn get(conn: &mut SqliteConnection, key: &str) -> CatalogResult<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

pub async fn set(conn: &mut SqliteConnection, key: &str, value: &str) -> CatalogResult<()> {
    sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Scan interval in minutes
pub async fn scan_interval(conn: &mut SqliteConnection) -> CatalogResult<u16> {
    match get(conn, SCAN_INTERVAL_KEY).await? {
        None => Ok(DEFAULT_SCAN_INTERVAL),
        Some(text) => text
            .parse()
            .map_err(|_| CatalogError::Internal(format!("bad scan_interval setting '{}'", text))),
    }
}

/// Store a scan interval; valid range is 1..=32767
pub async fn set_scan_interval(conn: &mut SqliteConnection, minutes: i64) -> CatalogResult<u16> {
    if !(1..=32767).contains(&minutes) {
        return Err(CatalogError::InvalidValue(format!(
            "interval {} outside range of 1 -> 32767",
            minutes
        )));
    }
    set(conn, SCAN_INTERVAL_KEY, &minutes.to_string()).await?;
    Ok(minutes as u16)
}
