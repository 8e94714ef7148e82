//! Duplicate Reconciler
//!
//! Two ways records get reconciled:
//! - **Content change**: a path bound to A is observed holding B. The path
//!   moves to B; A keeps its tags and is left to go `missing` if that was its
//!   last location. Tags are not transferred.
//! - **Merge**: A is declared the same logical image as B. B absorbs A's
//!   locations and tags, A becomes `merged-into:B` and everything that
//!   forwarded to A forwards to B.
//!
//! A merge source must still hold at least one location: a record that only
//! lost its paths to a content change has nothing that relates it to the
//! target.
//!
//! Merge validation runs twice: once unlocked to learn the lock set, and
//! again inside the transaction. If the second pass disagrees on the
//! survivor the merge fails with `Conflict`.

use crate::catalog::{apply_sighting, forward_chain, load_record, refresh_presence, CatalogStore, LockKey};
use crate::db::{images, locations, merges, tags};
use crate::error::{CatalogError, CatalogResult};
use crate::models::{ImageRecord, ImageStatus, MergeRecord, Observation};
use crate::utils::{begin_monitored, retry_transient};
use chrono::Utc;
use gopher_common::events::{EventBus, GopherEvent};
use gopher_common::Fingerprint;
use serde::Serialize;
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Result of a merge request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum MergeOutcome {
    /// The merge was applied
    Merged(MergeRecord),
    /// `from` already forwards to the requested survivor; nothing changed
    AlreadyMerged { from: Fingerprint, into: Fingerprint },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergePlan {
    Apply { survivor: Fingerprint },
    AlreadyMerged { survivor: Fingerprint },
}

/// Result of moving a path to new content
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChange {
    /// Record now holding the path
    pub record: ImageRecord,
    pub is_new: bool,
    /// Record that lost the path
    pub previous: Fingerprint,
    /// Status the previous record moved to, if it changed
    pub previous_status: Option<ImageStatus>,
}

#[derive(Clone)]
pub struct DuplicateReconciler {
    store: CatalogStore,
    event_bus: EventBus,
}

/// Check a merge request against committed state
///
/// Order: self-merge, existence, cycle, already-merged, then a source
/// with no locations is refused.
async fn plan_merge(conn: &mut SqliteConnection, from: &Fingerprint, to: &Fingerprint) -> CatalogResult<MergePlan> {
    if from == to {
        return Err(CatalogError::SelfMerge(*from));
    }

    let from_chain = forward_chain(conn, from)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("image {}", from)))?;
    let to_chain = forward_chain(conn, to)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("image {}", to)))?;

    if to_chain.contains(from) {
        return Err(CatalogError::CycleDetected { from: *from, to: *to });
    }

    let survivor = to_chain[to_chain.len() - 1];
    if from_chain.len() > 1 {
        let current = from_chain[from_chain.len() - 1];
        if current == survivor {
            return Ok(MergePlan::AlreadyMerged { survivor });
        }
        return Err(CatalogError::Conflict(format!(
            "{} is already merged into {}",
            from.short(),
            current.short()
        )));
    }

    if locations::presence(conn, from).await?.total == 0 {
        return Err(CatalogError::NothingToMerge(*from));
    }

    Ok(MergePlan::Apply { survivor })
}

impl DuplicateReconciler {
    pub fn new(store: CatalogStore, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    /// Move `obs.path` from `previous` to the content in `obs`
    ///
    /// Fails with `Conflict` if the path is no longer bound to `previous` or
    /// was bound by a newer observation; the caller re-plans.
    pub async fn content_changed(&self, obs: &Observation, previous: Fingerprint) -> CatalogResult<ContentChange> {
        let change = retry_transient("reconciler.content_changed", self.store.retry_policy(), || {
            self.try_content_changed(obs, previous)
        })
        .await?;

        self.event_bus.emit_lossy(GopherEvent::ContentChanged {
            path: obs.path.clone(),
            scanner_id: obs.scanner_id.clone(),
            previous,
            current: change.record.fingerprint,
            timestamp: Utc::now(),
        });
        if change.previous_status == Some(ImageStatus::Missing) {
            self.event_bus.emit_lossy(GopherEvent::ImageMissing {
                fingerprint: previous,
                timestamp: Utc::now(),
            });
        }

        Ok(change)
    }

    async fn try_content_changed(&self, obs: &Observation, previous: Fingerprint) -> CatalogResult<ContentChange> {
        let target = self.store.resolve(&obs.fingerprint).await?.unwrap_or(obs.fingerprint);
        if target == previous {
            return Err(CatalogError::Conflict(format!("{} already holds {}", obs.path, target.short())));
        }
        let obs = Observation {
            fingerprint: target,
            ..obs.clone()
        };

        let _locks = self
            .store
            .locks()
            .acquire([
                LockKey::location(&obs.scanner_id, &obs.path),
                LockKey::Image(previous),
                LockKey::Image(target),
            ])
            .await?;

        let mut tx = begin_monitored(self.store.pool(), "reconciler.content_changed").await?;
        let conn = tx.conn()?;

        match locations::binding(conn, &obs.scanner_id, &obs.path).await? {
            Some(bound) if bound.fingerprint == previous && bound.location.last_observed <= obs.observed_at => {}
            _ => {
                return Err(CatalogError::Conflict(format!(
                    "{} changed binding during reconciliation",
                    obs.path
                )))
            }
        }

        let current = images::load(conn, &target).await?;
        if current.as_ref().map(|r| r.status.is_merged()).unwrap_or(false) {
            return Err(CatalogError::Conflict(format!("{} was merged concurrently", target.short())));
        }

        let is_new = current.is_none();
        let row = match current {
            None => images::insert(conn, &obs).await?,
            Some(row) => row,
        };

        locations::upsert(conn, &obs).await?;
        apply_sighting(conn, &row, &obs).await?;
        refresh_presence(conn, &target, obs.observed_at, self.store.grace()).await?;
        let previous_status = refresh_presence(conn, &previous, obs.observed_at, self.store.grace()).await?;

        let record = load_record(conn, &target)
            .await?
            .ok_or_else(|| CatalogError::Internal(format!("{} vanished during rebind", target)))?;

        tx.commit().await?;

        tracing::info!(
            scanner_id = %obs.scanner_id,
            path = %obs.path,
            previous = %previous.short(),
            current = %target.short(),
            "Content changed at known path"
        );

        Ok(ContentChange {
            record,
            is_new,
            previous,
            previous_status,
        })
    }

    /// Merge `from` into `to`
    ///
    /// Idempotent: repeating an applied merge returns `AlreadyMerged`. A `to`
    /// that is itself merged resolves to its survivor first.
    pub async fn merge(&self, from: Fingerprint, to: Fingerprint, reason: Option<String>) -> CatalogResult<MergeOutcome> {
        let outcome = retry_transient("reconciler.merge", self.store.retry_policy(), || {
            self.try_merge(from, to, reason.as_deref())
        })
        .await?;

        match &outcome {
            MergeOutcome::Merged(record) => {
                tracing::info!(
                    from = %record.from.short(),
                    into = %record.into.short(),
                    locations_moved = record.locations_moved,
                    tags_moved = record.tags_moved,
                    "Images merged"
                );
                self.event_bus.emit_lossy(GopherEvent::ImagesMerged {
                    from: record.from,
                    into: record.into,
                    timestamp: record.merged_at,
                });
            }
            MergeOutcome::AlreadyMerged { from, into } => {
                tracing::debug!(from = %from.short(), into = %into.short(), "Merge already applied");
            }
        }

        Ok(outcome)
    }

    async fn try_merge(&self, from: Fingerprint, to: Fingerprint, reason: Option<&str>) -> CatalogResult<MergeOutcome> {
        let plan = {
            let mut conn = self.store.pool().acquire().await?;
            plan_merge(&mut conn, &from, &to).await?
        };
        let survivor = match plan {
            MergePlan::AlreadyMerged { survivor } => {
                return Ok(MergeOutcome::AlreadyMerged { from, into: survivor })
            }
            MergePlan::Apply { survivor } => survivor,
        };

        let locks = self.store.locks();
        let mut held = locks.acquire([LockKey::Image(from), LockKey::Image(survivor)]).await?;

        // from's tag set cannot change while Image(from) is held
        let from_tags = {
            let mut conn = self.store.pool().acquire().await?;
            tags::tags_for(&mut conn, &from).await?
        };
        held.extend(locks, from_tags.iter().cloned().map(LockKey::Tag)).await?;

        let mut tx = begin_monitored(self.store.pool(), "reconciler.merge").await?;
        let conn = tx.conn()?;

        match plan_merge(conn, &from, &to).await? {
            MergePlan::Apply { survivor: s } if s == survivor => {}
            MergePlan::AlreadyMerged { survivor: s } => {
                return Ok(MergeOutcome::AlreadyMerged { from, into: s })
            }
            MergePlan::Apply { survivor: s } => {
                return Err(CatalogError::Conflict(format!(
                    "survivor of {} moved to {} during merge",
                    to.short(),
                    s.short()
                )))
            }
        }

        let from_row = images::load(conn, &from)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("image {}", from)))?;
        let merged_at = Utc::now();

        let locations_moved = locations::move_all(conn, &from, &survivor).await?;
        let tags_moved = tags::move_all(conn, &from, &survivor, merged_at).await?;
        images::set_merged(conn, &from, &survivor, merged_at).await?;
        let reforwarded = images::reforward(conn, &from, &survivor).await?;
        images::widen_seen(conn, &survivor, from_row.first_seen, from_row.last_seen).await?;
        refresh_presence(conn, &survivor, merged_at, self.store.grace()).await?;

        let record = MergeRecord {
            merge_id: Uuid::new_v4().to_string(),
            from,
            into: survivor,
            reason: reason.map(str::to_string),
            locations_moved,
            tags_moved,
            merged_at,
        };
        merges::insert(conn, &record).await?;

        tx.commit().await?;

        if reforwarded > 0 {
            tracing::debug!(from = %from.short(), reforwarded, "Forwarding pointers moved to survivor");
        }

        Ok(MergeOutcome::Merged(record))
    }

    /// Merges a record took part in, oldest first
    pub async fn merge_history(&self, fp: &Fingerprint) -> CatalogResult<Vec<MergeRecord>> {
        retry_transient("reconciler.merge_history", self.store.retry_policy(), || async {
            let mut conn = self.store.pool().acquire().await?;
            if images::load(&mut conn, fp).await?.is_none() {
                return Err(CatalogError::NotFound(format!("image {}", fp)));
            }
            merges::history(&mut conn, fp).await
        })
        .await
    }
}
