//! Ingestion Coordinator
//!
//! Applies one [`ScanReport`]:
//! 1. Structural validation of the whole report; any failure rejects it
//!    before a single write (`MalformedReport`)
//! 2. Per entry: resolve identity under the trust mode, plan against the
//!    current binding of the path, apply through the store or reconciler
//! 3. Complete reports then flag the scanner's unreported locations
//! 4. Audit row and `ReportIngested` event
//!
//! Entry failures are collected in the result and never abort the batch.
//! Entries carry no ordering dependency on each other; the plan for each is
//! derived only from the catalog state and the entry itself.
//!
//! Cancellation stops before the next entry. Entries already applied stay
//! committed; a resubmission replays them idempotently.

use crate::catalog::CatalogStore;
use crate::db::{audit, locations::LocationRow};
use crate::error::{CatalogError, CatalogResult};
use crate::models::Observation;
use crate::services::content_source::{decode_inline, ContentSource};
use crate::services::reconciler::DuplicateReconciler;
use crate::utils::retry_transient;
use chrono::{DateTime, Utc};
use gopher_common::api::{EntryError, EntryResult, EntryStatus, IngestionResult, ScanEntry, ScanReport};
use gopher_common::config::TrustMode;
use gopher_common::events::{EventBus, GopherEvent};
use gopher_common::Fingerprint;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Re-plans of one entry after losing a race
const MAX_REPLANS: u32 = 3;

/// What applying an observation to a path means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPlan {
    /// Path unknown: bind it
    Create,
    /// Path already holds this content: refresh timestamps
    Refresh,
    /// Path holds other content: move it (content changed on disk)
    Rebind { previous: Fingerprint },
    /// Path was re-bound by a newer observation: ignore this one
    Stale { current: Fingerprint },
}

/// Decide how an observation applies to the current binding of its path
///
/// `obs.fingerprint` must already be resolved through merges.
pub fn plan_entry(binding: Option<&LocationRow>, obs: &Observation) -> EntryPlan {
    match binding {
        None => EntryPlan::Create,
        Some(bound) if bound.fingerprint == obs.fingerprint => EntryPlan::Refresh,
        Some(bound) if bound.location.last_observed > obs.observed_at => EntryPlan::Stale {
            current: bound.fingerprint,
        },
        Some(bound) => EntryPlan::Rebind {
            previous: bound.fingerprint,
        },
    }
}

/// Entry after structural validation
struct PreparedEntry<'a> {
    entry: &'a ScanEntry,
    supplied: Option<Fingerprint>,
}

pub(crate) fn is_absolute_path(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with("\\\\") {
        return true;
    }
    // Windows drive paths from scanners on other hosts
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Structural checks over the whole report
fn validate_report(report: &ScanReport) -> CatalogResult<Vec<PreparedEntry<'_>>> {
    if report.scanner_id.trim().is_empty() {
        return Err(CatalogError::MalformedReport("scanner_id is empty".to_string()));
    }
    if report.session_id.trim().is_empty() {
        return Err(CatalogError::MalformedReport("session_id is empty".to_string()));
    }

    let mut seen = HashSet::with_capacity(report.entries.len());
    let mut prepared = Vec::with_capacity(report.entries.len());

    for (index, entry) in report.entries.iter().enumerate() {
        if !is_absolute_path(&entry.path) {
            return Err(CatalogError::MalformedReport(format!(
                "entry {}: path '{}' is not absolute",
                index, entry.path
            )));
        }
        if !seen.insert(entry.path.as_str()) {
            return Err(CatalogError::MalformedReport(format!(
                "entry {}: duplicate path '{}'",
                index, entry.path
            )));
        }
        if entry.fingerprint.is_none() && entry.bytes_ref.is_none() && entry.bytes_b64.is_none() {
            return Err(CatalogError::MalformedReport(format!(
                "entry {}: needs a fingerprint or a bytes source",
                index
            )));
        }

        let supplied = entry
            .fingerprint
            .as_deref()
            .map(|text| {
                text.parse::<Fingerprint>().map_err(|_| {
                    CatalogError::MalformedReport(format!("entry {}: invalid fingerprint '{}'", index, text))
                })
            })
            .transpose()?;

        if let Some(encoded) = &entry.bytes_b64 {
            decode_inline(encoded)
                .map_err(|e| CatalogError::MalformedReport(format!("entry {}: {}", index, e)))?;
        }

        prepared.push(PreparedEntry { entry, supplied });
    }

    Ok(prepared)
}

fn entry_error(path: &str, err: &CatalogError) -> EntryResult {
    EntryResult {
        path: path.to_string(),
        status: EntryStatus::Error,
        fingerprint: None,
        previous_fingerprint: None,
        error: Some(EntryError {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }),
    }
}

/// Digest identifying a report body in the audit trail
pub fn report_digest(report: &ScanReport) -> CatalogResult<String> {
    let body = serde_json::to_vec(report)
        .map_err(|e| CatalogError::Internal(format!("serialize report: {}", e)))?;
    Ok(Fingerprint::of_bytes(&body).to_hex())
}

#[derive(Clone)]
pub struct IngestionCoordinator {
    store: CatalogStore,
    reconciler: DuplicateReconciler,
    content: Arc<dyn ContentSource>,
    event_bus: EventBus,
    trust_mode: TrustMode,
}

impl IngestionCoordinator {
    pub fn new(
        store: CatalogStore,
        reconciler: DuplicateReconciler,
        content: Arc<dyn ContentSource>,
        event_bus: EventBus,
        trust_mode: TrustMode,
    ) -> Self {
        Self {
            store,
            reconciler,
            content,
            event_bus,
            trust_mode,
        }
    }

    pub fn trust_mode(&self) -> TrustMode {
        self.trust_mode
    }

    /// Apply a scan report
    ///
    /// `Err` only for a structurally invalid report; everything else is
    /// reported per entry inside the result.
    pub async fn ingest(&self, report: &ScanReport, cancel: &CancellationToken) -> CatalogResult<IngestionResult> {
        let prepared = validate_report(report)?;
        let mut result = IngestionResult::for_report(report);

        tracing::info!(
            scanner_id = %report.scanner_id,
            session_id = %report.session_id,
            entries = prepared.len(),
            complete = report.complete,
            trust_mode = ?self.trust_mode,
            "Ingesting scan report"
        );

        for item in &prepared {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let entry_result = match self.ingest_entry(report, item).await {
                Ok(entry_result) => entry_result,
                Err(err) => {
                    tracing::warn!(path = %item.entry.path, error = %err, "Entry not applied");
                    entry_error(&item.entry.path, &err)
                }
            };
            result.push(entry_result);
        }

        if result.cancelled {
            tracing::warn!(
                scanner_id = %report.scanner_id,
                session_id = %report.session_id,
                applied = result.entries.len(),
                "Ingestion cancelled by caller"
            );
        } else if report.complete {
            self.close_session(report, &mut result).await;
        }

        self.record_audit(report, &result).await;

        self.event_bus.emit_lossy(GopherEvent::ReportIngested {
            scanner_id: result.scanner_id.clone(),
            session_id: result.session_id.clone(),
            created: result.created,
            updated: result.updated,
            content_changed: result.content_changed,
            errors: result.errors,
            timestamp: Utc::now(),
        });

        tracing::info!(
            scanner_id = %result.scanner_id,
            session_id = %result.session_id,
            created = result.created,
            updated = result.updated,
            content_changed = result.content_changed,
            stale = result.stale,
            errors = result.errors,
            missing_candidates = result.missing_candidates,
            "Scan report applied"
        );

        Ok(result)
    }

    /// Fingerprint for one entry under the trust mode
    async fn identify(&self, item: &PreparedEntry<'_>) -> CatalogResult<Fingerprint> {
        match (self.trust_mode, item.supplied) {
            (TrustMode::Trusted, Some(supplied)) => Ok(supplied),
            (_, supplied) => {
                let computed = self.content.identify_entry(item.entry).await?;
                match supplied {
                    Some(supplied) if supplied != computed => {
                        Err(CatalogError::FingerprintMismatch { supplied, computed })
                    }
                    _ => Ok(computed),
                }
            }
        }
    }

    async fn ingest_entry(&self, report: &ScanReport, item: &PreparedEntry<'_>) -> CatalogResult<EntryResult> {
        let fingerprint = self.identify(item).await?;
        let mut obs = Observation {
            scanner_id: report.scanner_id.clone(),
            session_id: report.session_id.clone(),
            path: item.entry.path.clone(),
            fingerprint,
            byte_size: item.entry.size,
            modified_at: item.entry.mtime,
            observed_at: report.scanned_at,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            obs.fingerprint = self.store.resolve(&fingerprint).await?.unwrap_or(fingerprint);
            let binding = self.store.binding(&obs.scanner_id, &obs.path).await?;
            let plan = plan_entry(binding.as_ref(), &obs);

            match self.apply(&obs, plan).await {
                Err(CatalogError::Conflict(reason)) if attempt < MAX_REPLANS => {
                    tracing::debug!(path = %obs.path, attempt, %reason, "Entry lost a race, re-planning");
                }
                other => return other,
            }
        }
    }

    async fn apply(&self, obs: &Observation, plan: EntryPlan) -> CatalogResult<EntryResult> {
        let mut entry = EntryResult {
            path: obs.path.clone(),
            status: EntryStatus::Updated,
            fingerprint: Some(obs.fingerprint),
            previous_fingerprint: None,
            error: None,
        };

        match plan {
            EntryPlan::Create | EntryPlan::Refresh => {
                let (record, is_new) = self.store.upsert(obs).await?;
                entry.fingerprint = Some(record.fingerprint);
                if is_new {
                    entry.status = EntryStatus::Created;
                    self.emit_created(obs, record.fingerprint);
                }
            }
            EntryPlan::Rebind { previous } => {
                let change = self.reconciler.content_changed(obs, previous).await?;
                entry.status = EntryStatus::ContentChanged;
                entry.fingerprint = Some(change.record.fingerprint);
                entry.previous_fingerprint = Some(previous);
                if change.is_new {
                    self.emit_created(obs, change.record.fingerprint);
                }
            }
            EntryPlan::Stale { current } => {
                tracing::debug!(
                    path = %obs.path,
                    current = %current.short(),
                    observed = %obs.fingerprint.short(),
                    "Ignoring observation older than current binding"
                );
                entry.status = EntryStatus::Stale;
                entry.previous_fingerprint = Some(current);
            }
        }

        Ok(entry)
    }

    fn emit_created(&self, obs: &Observation, fingerprint: Fingerprint) {
        self.event_bus.emit_lossy(GopherEvent::ImageCreated {
            fingerprint,
            path: obs.path.clone(),
            scanner_id: obs.scanner_id.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Missing detection for a complete report
    ///
    /// Still-present paths are every path this session has reported in any
    /// batch, plus every path in this report (including failed entries). A
    /// storage failure is kept on the result so the caller resends.
    async fn close_session(&self, report: &ScanReport, result: &mut IngestionResult) {
        if let Err(err) = self.detect_missing(report, result).await {
            tracing::error!(
                scanner_id = %report.scanner_id,
                session_id = %report.session_id,
                error = %err,
                "Missing detection failed"
            );
            result.missing_detection_error = Some(EntryError {
                code: err.code().to_string(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            });
        }
    }

    async fn detect_missing(&self, report: &ScanReport, result: &mut IngestionResult) -> CatalogResult<()> {
        let seen = self.store.session_paths(&report.scanner_id, &report.session_id).await?;
        let still_present: HashSet<String> = seen
            .into_iter()
            .chain(report.entries.iter().map(|e| e.path.clone()))
            .collect();

        let pass = self
            .store
            .mark_missing(&report.scanner_id, &still_present, report.scanned_at, self.store.grace())
            .await?;
        result.missing_candidates = pass.candidates;
        for fingerprint in pass.promoted {
            self.event_bus.emit_lossy(GopherEvent::ImageMissing {
                fingerprint,
                timestamp: report.scanned_at,
            });
        }
        Ok(())
    }

    async fn record_audit(&self, report: &ScanReport, result: &IngestionResult) {
        let digest = match report_digest(report) {
            Ok(digest) => digest,
            Err(err) => {
                tracing::warn!(error = %err, "Cannot digest report for audit");
                return;
            }
        };
        let received_at: DateTime<Utc> = Utc::now();
        let outcome = retry_transient("coordinator.audit", self.store.retry_policy(), || async {
            let mut conn = self.store.pool().acquire().await?;
            audit::record(&mut conn, &digest, report.complete, result, received_at).await
        })
        .await;

        if let Err(err) = outcome {
            tracing::warn!(
                scanner_id = %report.scanner_id,
                session_id = %report.session_id,
                error = %err,
                "Audit row not written"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileLocation;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn obs(fp: Fingerprint, observed_at: DateTime<Utc>) -> Observation {
        Observation {
            scanner_id: "s1".into(),
            session_id: "sess".into(),
            path: "/a.jpg".into(),
            fingerprint: fp,
            byte_size: 1,
            modified_at: observed_at,
            observed_at,
        }
    }

    fn bound(fp: Fingerprint, last_observed: DateTime<Utc>) -> LocationRow {
        LocationRow {
            fingerprint: fp,
            location: FileLocation {
                scanner_id: "s1".into(),
                path: "/a.jpg".into(),
                last_observed,
                modified_at: last_observed,
                last_session: "old".into(),
                missing_since: None,
            },
        }
    }

    fn entry(path: &str) -> ScanEntry {
        ScanEntry {
            path: path.to_string(),
            size: 3,
            fingerprint: Some(Fingerprint::of_bytes(path.as_bytes()).to_hex()),
            bytes_ref: None,
            bytes_b64: None,
            mtime: at(0),
        }
    }

    fn report(entries: Vec<ScanEntry>) -> ScanReport {
        ScanReport {
            scanner_id: "s1".into(),
            session_id: "sess".into(),
            scanned_at: at(0),
            complete: true,
            entries,
        }
    }

    #[test]
    fn test_plan_entry_cases() {
        let h1 = Fingerprint::of_bytes(b"h1");
        let h2 = Fingerprint::of_bytes(b"h2");

        assert_eq!(plan_entry(None, &obs(h1, at(10))), EntryPlan::Create);
        assert_eq!(plan_entry(Some(&bound(h1, at(10))), &obs(h1, at(5))), EntryPlan::Refresh);
        assert_eq!(
            plan_entry(Some(&bound(h1, at(10))), &obs(h2, at(20))),
            EntryPlan::Rebind { previous: h1 }
        );
        assert_eq!(
            plan_entry(Some(&bound(h2, at(20))), &obs(h1, at(10))),
            EntryPlan::Stale { current: h2 }
        );
        // Same instant, different content: the observation wins
        assert_eq!(
            plan_entry(Some(&bound(h1, at(10))), &obs(h2, at(10))),
            EntryPlan::Rebind { previous: h1 }
        );
    }

    #[test]
    fn test_validation_rejects_structural_problems() {
        let mut r = report(vec![entry("/a.jpg"), entry("/a.jpg")]);
        assert!(matches!(validate_report(&r), Err(CatalogError::MalformedReport(_))));

        r.entries = vec![entry("relative/a.jpg")];
        assert!(matches!(validate_report(&r), Err(CatalogError::MalformedReport(_))));

        let mut bad_fp = entry("/a.jpg");
        bad_fp.fingerprint = Some("xyz".into());
        r.entries = vec![bad_fp];
        assert!(matches!(validate_report(&r), Err(CatalogError::MalformedReport(_))));

        let mut no_source = entry("/a.jpg");
        no_source.fingerprint = None;
        r.entries = vec![no_source];
        assert!(matches!(validate_report(&r), Err(CatalogError::MalformedReport(_))));

        let mut bad_b64 = entry("/a.jpg");
        bad_b64.bytes_b64 = Some("%%%".into());
        r.entries = vec![bad_b64];
        assert!(matches!(validate_report(&r), Err(CatalogError::MalformedReport(_))));

        r.entries = vec![entry("/a.jpg")];
        r.scanner_id = "  ".into();
        assert!(matches!(validate_report(&r), Err(CatalogError::MalformedReport(_))));
    }

    #[test]
    fn test_validation_accepts_windows_paths_and_empty_reports() {
        let r = report(vec![entry("C:\\Photos\\a.jpg"), entry("/b.jpg")]);
        assert_eq!(validate_report(&r).unwrap().len(), 2);
        assert!(validate_report(&report(vec![])).unwrap().is_empty());
    }

    #[test]
    fn test_report_digest_is_stable() {
        let r = report(vec![entry("/a.jpg")]);
        assert_eq!(report_digest(&r).unwrap(), report_digest(&r.clone()).unwrap());
        let mut other = r.clone();
        other.complete = false;
        assert_ne!(report_digest(&r).unwrap(), report_digest(&other).unwrap());
    }
}
