//! Test Helper Utilities
//!
//! Shared builders for gopher-burrow integration tests

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use gopher_burrow::config::IngestSettings;
use gopher_burrow::services::FsContentSource;
use gopher_burrow::AppState;
use gopher_common::api::{ScanEntry, ScanReport};
use gopher_common::config::TrustMode;
use gopher_common::events::EventBus;
use gopher_common::Fingerprint;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Fixed epoch so timestamps are reproducible across runs
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_550_400 + secs, 0).unwrap()
}

pub fn days(n: i64) -> i64 {
    n * 86_400
}

pub fn fp(content: &[u8]) -> Fingerprint {
    Fingerprint::of_bytes(content)
}

/// Untrusted settings with a custom grace period
pub fn settings_with_grace(grace: Duration) -> IngestSettings {
    IngestSettings {
        missing_grace: grace,
        ..IngestSettings::default()
    }
}

pub fn trusted_settings() -> IngestSettings {
    IngestSettings {
        trust_mode: TrustMode::Trusted,
        ..IngestSettings::default()
    }
}

/// Entry carrying its bytes inline plus the matching fingerprint
pub fn entry(path: &str, content: &[u8]) -> ScanEntry {
    ScanEntry {
        path: path.to_string(),
        size: content.len() as u64,
        fingerprint: Some(fp(content).to_hex()),
        bytes_ref: None,
        bytes_b64: Some(STANDARD.encode(content)),
        mtime: at(-days(30)),
    }
}

/// Entry carrying only a scanner-computed fingerprint
pub fn fingerprint_entry(path: &str, fingerprint: Fingerprint, size: u64) -> ScanEntry {
    ScanEntry {
        path: path.to_string(),
        size,
        fingerprint: Some(fingerprint.to_hex()),
        bytes_ref: None,
        bytes_b64: None,
        mtime: at(-days(30)),
    }
}

pub fn report(scanner_id: &str, session_id: &str, scanned_at: DateTime<Utc>, entries: Vec<ScanEntry>) -> ScanReport {
    ScanReport {
        scanner_id: scanner_id.to_string(),
        session_id: session_id.to_string(),
        scanned_at,
        complete: true,
        entries,
    }
}

/// App state over a fresh in-memory catalog
pub async fn memory_state(settings: IngestSettings) -> AppState {
    let pool = gopher_burrow::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory catalog");
    state_for(pool, &settings)
}

/// App state over a file catalog (multi-connection, WAL)
///
/// The TempDir must outlive the state.
pub async fn file_state(settings: IngestSettings) -> (TempDir, AppState) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = gopher_burrow::db::init_database_pool(&temp_dir.path().join("burrow.db"), settings.lock_timeout)
        .await
        .expect("Failed to open file catalog");
    let state = state_for(pool, &settings);
    (temp_dir, state)
}

fn state_for(pool: SqlitePool, settings: &IngestSettings) -> AppState {
    AppState::new(pool, EventBus::new(256), settings, Arc::new(FsContentSource::new()))
}

/// Make the catalog refuse to flag locations absent, as a busy backend would
///
/// Sightings still apply; only missing detection hits the failure.
pub async fn refuse_missing_flags(state: &AppState) {
    sqlx::query(
        r#"
        CREATE TRIGGER refuse_missing_flags
        BEFORE UPDATE OF missing_since ON locations
        WHEN NEW.missing_since IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'database is locked');
        END
        "#,
    )
    .execute(&state.db)
    .await
    .expect("Failed to install trigger");
}

pub async fn allow_missing_flags(state: &AppState) {
    sqlx::query("DROP TRIGGER refuse_missing_flags")
        .execute(&state.db)
        .await
        .expect("Failed to drop trigger");
}
