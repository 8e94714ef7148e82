//! Catalog Store
//!
//! Owns all durable catalog state. Every mutation:
//! 1. takes the per-key locks it touches from the [`LockRegistry`] (bounded wait)
//! 2. runs in one SQLite transaction, re-verifying what it read before locking
//! 3. is retried with backoff on transient storage failures
//!
//! A mutation that finds the catalog changed between its unlocked read and
//! its locked re-check fails with `Conflict`; callers re-plan and retry.
//!
//! Invariant: locations always reference a record that is not merged.

pub mod locks;

pub use locks::{LockKey, LockRegistry, LockSet};

use crate::config::IngestSettings;
use crate::db::{images, locations, tags};
use crate::error::{CatalogError, CatalogResult};
use crate::models::{CatalogStats, FileLocation, ImageRecord, ImageStatus, Observation};
use crate::utils::{begin_monitored, retry_transient, RetryPolicy};
use chrono::{DateTime, Duration, Utc};
use gopher_common::Fingerprint;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;

/// Longest forwarding chain followed before giving up
const MAX_FORWARD_HOPS: usize = 64;

/// Outcome of a `mark_missing` pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissingPass {
    /// Scanner locations absent from the session
    pub candidates: usize,
    /// Locations flagged absent by this pass
    pub newly_flagged: usize,
    /// Records that became `missing`
    pub promoted: Vec<Fingerprint>,
}

/// Handle to the catalog; cheap to clone
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
    locks: Arc<LockRegistry>,
    retry: RetryPolicy,
    grace: Duration,
}

impl CatalogStore {
    pub fn new(pool: SqlitePool, settings: &IngestSettings) -> Self {
        Self {
            pool,
            locks: Arc::new(LockRegistry::new(settings.lock_timeout)),
            retry: RetryPolicy::with_attempts(settings.storage_retry_attempts),
            grace: settings.missing_grace,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Missing grace period
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Add or refresh a location of the record for `obs.fingerprint`
    ///
    /// Creates the record on first sighting. A merged fingerprint binds to its
    /// survivor. Fails with `Conflict` if the path is currently bound to other
    /// content; use [`binding`](Self::binding) and the reconciler for that case.
    pub async fn upsert(&self, obs: &Observation) -> CatalogResult<(ImageRecord, bool)> {
        retry_transient("catalog.upsert", self.retry, || self.try_upsert(obs)).await
    }

    async fn try_upsert(&self, obs: &Observation) -> CatalogResult<(ImageRecord, bool)> {
        let target = self.resolve(&obs.fingerprint).await?.unwrap_or(obs.fingerprint);
        let obs = Observation {
            fingerprint: target,
            ..obs.clone()
        };

        let _locks = self
            .locks
            .acquire([
                LockKey::location(&obs.scanner_id, &obs.path),
                LockKey::Image(target),
            ])
            .await?;

        let mut tx = begin_monitored(&self.pool, "catalog.upsert").await?;
        let conn = tx.conn()?;

        let current = images::load(conn, &target).await?;
        if let Some(row) = &current {
            if row.status.is_merged() {
                return Err(CatalogError::Conflict(format!(
                    "{} was merged while binding {}",
                    target.short(),
                    obs.path
                )));
            }
        }

        if let Some(bound) = locations::binding(conn, &obs.scanner_id, &obs.path).await? {
            if bound.fingerprint != target {
                return Err(CatalogError::Conflict(format!(
                    "{} is bound to {}, not {}",
                    obs.path,
                    bound.fingerprint.short(),
                    target.short()
                )));
            }
        }

        let is_new = current.is_none();
        let row = match current {
            None => images::insert(conn, &obs).await?,
            Some(row) => row,
        };

        locations::upsert(conn, &obs).await?;
        apply_sighting(conn, &row, &obs).await?;
        refresh_presence(conn, &target, obs.observed_at, self.grace).await?;

        let record = load_record(conn, &target)
            .await?
            .ok_or_else(|| CatalogError::Internal(format!("{} vanished during upsert", target)))?;

        tx.commit().await?;

        tracing::debug!(
            fingerprint = %target.short(),
            scanner_id = %obs.scanner_id,
            path = %obs.path,
            is_new,
            "Location upserted"
        );

        Ok((record, is_new))
    }

    /// Which record currently claims a path (`relocate`)
    pub async fn binding(&self, scanner_id: &str, path: &str) -> CatalogResult<Option<locations::LocationRow>> {
        retry_transient("catalog.binding", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            locations::binding(&mut conn, scanner_id, path).await
        })
        .await
    }

    /// Fingerprint currently bound to a path
    pub async fn relocate(&self, path: &str, scanner_id: &str) -> CatalogResult<Option<Fingerprint>> {
        Ok(self.binding(scanner_id, path).await?.map(|b| b.fingerprint))
    }

    /// Flag locations a complete scan did not report
    ///
    /// Every location of `scanner_id` outside `still_present` is a candidate.
    /// A candidate's `missing_since` is set on its first miss and kept after;
    /// its record becomes `missing` once every location has been absent for
    /// at least `grace` as of `at`. Other scanners' locations are untouched.
    pub async fn mark_missing(
        &self,
        scanner_id: &str,
        still_present: &HashSet<String>,
        at: DateTime<Utc>,
        grace: Duration,
    ) -> CatalogResult<MissingPass> {
        let known = retry_transient("catalog.mark_missing.scan", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            locations::for_scanner(&mut conn, scanner_id).await
        })
        .await?;

        let mut pass = MissingPass::default();
        for candidate in known.iter().filter(|b| !still_present.contains(&b.location.path)) {
            pass.candidates += 1;
            let (flagged, promoted) = retry_transient("catalog.mark_missing", self.retry, || {
                self.try_flag_absent(candidate, still_present, at, grace)
            })
            .await?;
            if flagged {
                pass.newly_flagged += 1;
            }
            if let Some(fp) = promoted {
                pass.promoted.push(fp);
            }
        }

        if pass.candidates > 0 {
            tracing::info!(
                scanner_id,
                candidates = pass.candidates,
                newly_flagged = pass.newly_flagged,
                promoted = pass.promoted.len(),
                "Missing candidates recorded"
            );
        }

        Ok(pass)
    }

    async fn try_flag_absent(
        &self,
        candidate: &locations::LocationRow,
        still_present: &HashSet<String>,
        at: DateTime<Utc>,
        grace: Duration,
    ) -> CatalogResult<(bool, Option<Fingerprint>)> {
        let loc = &candidate.location;
        let _locks = self
            .locks
            .acquire([
                LockKey::location(&loc.scanner_id, &loc.path),
                LockKey::Image(candidate.fingerprint),
            ])
            .await?;

        let mut tx = begin_monitored(&self.pool, "catalog.mark_missing").await?;
        let conn = tx.conn()?;

        // Rebound or re-observed since the unlocked scan
        let current = locations::binding(conn, &loc.scanner_id, &loc.path).await?;
        let Some(current) = current.filter(|c| c.fingerprint == candidate.fingerprint) else {
            return Ok((false, None));
        };
        if still_present.contains(&current.location.path) || current.location.last_observed > at {
            return Ok((false, None));
        }

        let flagged = locations::set_missing_since(conn, &loc.scanner_id, &loc.path, at).await?;
        let change = refresh_presence(conn, &candidate.fingerprint, at, grace).await?;
        tx.commit().await?;

        let promoted = matches!(change, Some(ImageStatus::Missing)).then_some(candidate.fingerprint);
        Ok((flagged, promoted))
    }

    /// Promote records absent for longer than `grace` as of `now`
    pub async fn sweep_missing(&self, now: DateTime<Utc>, grace: Duration) -> CatalogResult<Vec<Fingerprint>> {
        let due = retry_transient("catalog.sweep_missing.scan", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            images::list_absent_before(&mut conn, now - grace).await
        })
        .await?;

        let mut promoted = Vec::new();
        for fp in due {
            let change = retry_transient("catalog.sweep_missing", self.retry, || async {
                let _locks = self.locks.acquire([LockKey::Image(fp)]).await?;
                let mut tx = begin_monitored(&self.pool, "catalog.sweep_missing").await?;
                let change = refresh_presence(tx.conn()?, &fp, now, grace).await?;
                tx.commit().await?;
                Ok::<_, CatalogError>(change)
            })
            .await?;
            if matches!(change, Some(ImageStatus::Missing)) {
                promoted.push(fp);
            }
        }

        Ok(promoted)
    }

    /// Delete `missing` records older than `cutoff` that nothing forwards to
    pub async fn purge_missing(&self, cutoff: DateTime<Utc>) -> CatalogResult<Vec<Fingerprint>> {
        let due = retry_transient("catalog.purge.scan", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            images::list_purgeable(&mut conn, cutoff).await
        })
        .await?;

        let mut purged = Vec::new();
        for fp in due {
            let deleted = retry_transient("catalog.purge", self.retry, || self.try_purge(&fp, cutoff)).await?;
            if deleted {
                purged.push(fp);
            }
        }

        if !purged.is_empty() {
            tracing::info!(count = purged.len(), "Purged long-missing records");
        }
        Ok(purged)
    }

    async fn try_purge(&self, fp: &Fingerprint, cutoff: DateTime<Utc>) -> CatalogResult<bool> {
        let mut locks = self.locks.acquire([LockKey::Image(*fp)]).await?;
        let memberships = {
            let mut conn = self.pool.acquire().await?;
            tags::tags_for(&mut conn, fp).await?
        };
        locks
            .extend(&self.locks, memberships.into_iter().map(LockKey::Tag))
            .await?;

        let mut tx = begin_monitored(&self.pool, "catalog.purge").await?;
        let conn = tx.conn()?;
        let still_due = images::list_purgeable(conn, cutoff).await?.contains(fp);
        if still_due {
            images::delete(conn, fp).await?;
        }
        tx.commit().await?;
        Ok(still_due)
    }

    /// Record as stored (a merged record reports `merged-into:<fp>`)
    pub async fn get(&self, fp: &Fingerprint) -> CatalogResult<Option<ImageRecord>> {
        retry_transient("catalog.get", self.retry, || async {
            // One read transaction, so the record is a consistent snapshot
            let mut tx = begin_monitored(&self.pool, "catalog.get").await?;
            let record = load_record(tx.conn()?, fp).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    /// Record that `fp` resolves to after following merges
    pub async fn get_resolved(&self, fp: &Fingerprint) -> CatalogResult<Option<ImageRecord>> {
        match self.resolve(fp).await? {
            Some(survivor) => self.get(&survivor).await,
            None => Ok(None),
        }
    }

    /// Follow `merged-into` pointers to the surviving record
    ///
    /// Returns None for an unknown fingerprint. Chains longer than one hop are
    /// compressed so later lookups take a single step.
    pub async fn resolve(&self, fp: &Fingerprint) -> CatalogResult<Option<Fingerprint>> {
        retry_transient("catalog.resolve", self.retry, || self.try_resolve(fp)).await
    }

    async fn try_resolve(&self, fp: &Fingerprint) -> CatalogResult<Option<Fingerprint>> {
        let chain = {
            let mut conn = self.pool.acquire().await?;
            forward_chain(&mut conn, fp).await?
        };
        let Some(chain) = chain else {
            return Ok(None);
        };
        let root = chain[chain.len() - 1];

        if chain.len() > 2 {
            self.compress(&chain).await?;
        }
        Ok(Some(root))
    }

    async fn compress(&self, chain: &[Fingerprint]) -> CatalogResult<()> {
        let _locks = self
            .locks
            .acquire(chain.iter().copied().map(LockKey::Image))
            .await?;
        let mut tx = begin_monitored(&self.pool, "catalog.compress").await?;
        let conn = tx.conn()?;

        let Some(current) = forward_chain(conn, &chain[0]).await? else {
            return Ok(());
        };
        let root = current[current.len() - 1];
        let mut rewritten = 0;
        for member in &current[..current.len() - 1] {
            if images::set_forward(conn, member, &root).await? {
                rewritten += 1;
            }
        }
        tx.commit().await?;

        tracing::debug!(root = %root.short(), rewritten, "Compressed forwarding chain");
        Ok(())
    }

    /// Locations of one record
    pub async fn list_locations(&self, fp: &Fingerprint) -> CatalogResult<Vec<FileLocation>> {
        retry_transient("catalog.list_locations", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            locations::for_image(&mut conn, fp).await
        })
        .await
    }

    /// Paths a scanner reported in one session
    pub async fn session_paths(&self, scanner_id: &str, session_id: &str) -> CatalogResult<HashSet<String>> {
        retry_transient("catalog.session_paths", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            locations::session_paths(&mut conn, scanner_id, session_id).await
        })
        .await
    }

    /// Record counts per status
    pub async fn stats(&self) -> CatalogResult<CatalogStats> {
        retry_transient("catalog.stats", self.retry, || async {
            let mut conn = self.pool.acquire().await?;
            images::stats(&mut conn).await
        })
        .await
    }
}

/// `[fp, .., survivor]`, or None if `fp` is unknown
pub(crate) async fn forward_chain(
    conn: &mut SqliteConnection,
    fp: &Fingerprint,
) -> CatalogResult<Option<Vec<Fingerprint>>> {
    let mut chain = vec![*fp];
    let mut current = *fp;
    loop {
        match images::forward_of(conn, &current).await? {
            None if chain.len() == 1 => return Ok(None),
            None => {
                return Err(CatalogError::Internal(format!(
                    "{} forwards to unknown record {}",
                    chain[chain.len() - 2],
                    current
                )))
            }
            Some(None) => return Ok(Some(chain)),
            Some(Some(next)) => {
                if chain.contains(&next) || chain.len() > MAX_FORWARD_HOPS {
                    return Err(CatalogError::Internal(format!(
                        "forwarding chain from {} does not terminate",
                        fp
                    )));
                }
                chain.push(next);
                current = next;
            }
        }
    }
}

/// Full record with locations and tags
pub(crate) async fn load_record(conn: &mut SqliteConnection, fp: &Fingerprint) -> CatalogResult<Option<ImageRecord>> {
    let Some(row) = images::load(conn, fp).await? else {
        return Ok(None);
    };
    let locations = locations::for_image(conn, fp).await?;
    let tags = tags::tags_for(conn, fp).await?;

    Ok(Some(ImageRecord {
        fingerprint: row.fingerprint,
        byte_size: row.byte_size,
        first_seen: row.first_seen,
        last_seen: row.last_seen,
        status: row.status,
        absent_since: row.absent_since,
        locations,
        tags,
    }))
}

/// Fold a sighting into `row` once its location has been written
///
/// An observation older than the location's current miss only widens the
/// seen window; it must not revive the record.
pub(crate) async fn apply_sighting(
    conn: &mut SqliteConnection,
    row: &images::ImageRow,
    obs: &Observation,
) -> CatalogResult<()> {
    let fresh = locations::binding(conn, &obs.scanner_id, &obs.path)
        .await?
        .map(|b| b.location.missing_since.is_none())
        .unwrap_or(false);

    if fresh {
        images::record_sighting(conn, row, obs).await?;
    } else {
        images::widen_seen(conn, &row.fingerprint, obs.observed_at, obs.observed_at).await?;
    }
    Ok(())
}

/// Recompute presence columns from a record's locations
///
/// Returns the new status if it changed. Merged records are left alone.
pub(crate) async fn refresh_presence(
    conn: &mut SqliteConnection,
    fp: &Fingerprint,
    at: DateTime<Utc>,
    grace: Duration,
) -> CatalogResult<Option<ImageStatus>> {
    let Some(row) = images::load(conn, fp).await? else {
        return Ok(None);
    };
    if row.status.is_merged() {
        return Ok(None);
    }

    let presence = locations::presence(conn, fp).await?;
    let (status, absent_since) = if presence.present > 0 {
        let status = match row.status {
            ImageStatus::Missing => ImageStatus::Active,
            other => other,
        };
        (status, None)
    } else {
        let absent_since = match (row.absent_since, presence.last_missing_since) {
            (Some(existing), _) if presence.total == 0 => existing,
            (_, Some(last_miss)) => last_miss,
            (Some(existing), None) => existing,
            (None, None) => at,
        };
        let status = if at - absent_since >= grace {
            ImageStatus::Missing
        } else {
            row.status
        };
        (status, Some(absent_since))
    };

    if status == row.status && absent_since == row.absent_since {
        return Ok(None);
    }

    images::set_presence(conn, fp, status, absent_since, at).await?;
    if status != row.status {
        tracing::debug!(fingerprint = %fp.short(), from = %row.status, to = %status, "Record status changed");
        Ok(Some(status))
    } else {
        Ok(None)
    }
}
