//! Wire types for the burrow service boundary
//!
//! Gatherers submit [`ScanReport`]s; the burrow answers with an
//! [`IngestionResult`] carrying one [`EntryResult`] per submitted entry.

use crate::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_complete() -> bool {
    true
}

/// One batch of discovery results from one scanner session
///
/// Immutable once submitted. `complete` marks the batch that closes a full
/// scan; only complete reports feed missing-file detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    /// Identity of the submitting scanner
    pub scanner_id: String,
    /// Scan session identifier (stable across retries and batches of one scan)
    pub session_id: String,
    /// When the scanner observed the files
    pub scanned_at: DateTime<Utc>,
    /// True when this batch closes a full scan of the scanner's libraries
    #[serde(default = "default_complete")]
    pub complete: bool,
    /// Observed files, in scanner order
    pub entries: Vec<ScanEntry>,
}

/// One observed file
///
/// At least one of `fingerprint`, `bytes_b64` or `bytes_ref` must be set.
/// The fingerprint is kept as text here so a malformed value is reported as a
/// structural error rather than a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanEntry {
    /// Absolute path on the scanner's filesystem
    pub path: String,
    /// File size in bytes as seen by the scanner
    pub size: u64,
    /// Hex SHA-256 computed by the scanner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Path the burrow can read the bytes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_ref: Option<String>,
    /// Inline content, base64 (standard alphabet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_b64: Option<String>,
    /// File modification time
    pub mtime: DateTime<Utc>,
}

/// Per-entry ingestion outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    /// First sighting of this content
    Created,
    /// Known content, location added or refreshed
    Updated,
    /// Known path now holds different content
    ContentChanged,
    /// Observation older than the current binding of the path; ignored
    Stale,
    /// Entry could not be applied
    Error,
}

/// Error detail for one entry or for a report-level step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryError {
    /// Machine readable code (e.g. "unreadable-input")
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Whether resubmitting the entry may succeed
    pub retryable: bool,
}

/// Result for one submitted entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryResult {
    pub path: String,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Set for `content-changed`: the fingerprint the path was bound to before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
}

/// Summary of applying one scan report
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionResult {
    pub scanner_id: String,
    pub session_id: String,
    pub created: usize,
    pub updated: usize,
    pub content_changed: usize,
    pub stale: usize,
    /// Locations of this scanner absent from the session (missing candidates)
    pub missing_candidates: usize,
    /// Number of entries with status `error`
    pub errors: usize,
    /// Ingestion stopped early on caller cancellation
    #[serde(default)]
    pub cancelled: bool,
    /// Missing detection of a complete report did not run to the end;
    /// `missing_candidates` is then not authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_detection_error: Option<EntryError>,
    pub entries: Vec<EntryResult>,
}

impl IngestionResult {
    /// Empty result for a report
    pub fn for_report(report: &ScanReport) -> Self {
        Self {
            scanner_id: report.scanner_id.clone(),
            session_id: report.session_id.clone(),
            ..Default::default()
        }
    }

    /// Record one entry outcome and bump the matching counter
    pub fn push(&mut self, entry: EntryResult) {
        match entry.status {
            EntryStatus::Created => self.created += 1,
            EntryStatus::Updated => self.updated += 1,
            EntryStatus::ContentChanged => self.content_changed += 1,
            EntryStatus::Stale => self.stale += 1,
            EntryStatus::Error => self.errors += 1,
        }
        self.entries.push(entry);
    }

    /// True if at least one entry failed
    pub fn has_entry_errors(&self) -> bool {
        self.errors > 0
    }

    /// True if any part of the report was not fully applied
    pub fn is_partial(&self) -> bool {
        self.cancelled || self.has_entry_errors() || self.missing_detection_error.is_some()
    }
}

/// Body of `POST /images/merge`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeRequest {
    pub from: Fingerprint,
    pub to: Fingerprint,
    /// Free text recorded in the merge history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `POST /images/{fingerprint}/tags`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagRequest {
    pub tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_complete_defaults_to_true() {
        let report: ScanReport = serde_json::from_value(json!({
            "scanner_id": "s1",
            "session_id": "sess-1",
            "scanned_at": "2024-05-01T10:00:00Z",
            "entries": [{
                "path": "/photos/a.jpg",
                "size": 10,
                "fingerprint": "00".repeat(32),
                "mtime": "2024-04-30T09:00:00Z"
            }]
        }))
        .unwrap();

        assert!(report.complete);
        assert_eq!(report.entries.len(), 1);
        assert!(report.entries[0].bytes_ref.is_none());
    }

    #[test]
    fn test_entry_status_serializes_kebab_case() {
        let text = serde_json::to_string(&EntryStatus::ContentChanged).unwrap();
        assert_eq!(text, "\"content-changed\"");
    }

    #[test]
    fn test_push_updates_counters() {
        let mut result = IngestionResult::default();
        for status in [
            EntryStatus::Created,
            EntryStatus::Updated,
            EntryStatus::Updated,
            EntryStatus::Error,
        ] {
            result.push(EntryResult {
                path: "/x".to_string(),
                status,
                fingerprint: None,
                previous_fingerprint: None,
                error: None,
            });
        }
        assert_eq!(result.created, 1);
        assert_eq!(result.updated, 2);
        assert_eq!(result.errors, 1);
        assert!(result.has_entry_errors());
        assert!(result.is_partial());
        assert_eq!(result.entries.len(), 4);
    }
}
