//! Tag Graph
//!
//! Tag names are normalized before every lookup so `Paris`, ` paris ` and
//! `PARIS` are one tag. Membership lives in a single table, so an image's
//! tag set and a tag's image set cannot disagree.
//!
//! Mutations lock the image (resolved through merges) and the tag name.

use crate::catalog::{CatalogStore, LockKey};
use crate::db::{images, tags};
use crate::error::{CatalogError, CatalogResult};
use crate::utils::{begin_monitored, calculate_pagination, retry_transient, Pagination};
use chrono::Utc;
use gopher_common::events::{EventBus, GopherEvent};
use gopher_common::Fingerprint;
use serde::Serialize;
use std::fmt;

pub use crate::db::tags::TagSummary;

/// Longest accepted normalized tag name
pub const MAX_TAG_LEN: usize = 128;

/// Normalized tag name, optionally namespace-qualified (`location:paris`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagName {
    full: String,
    namespace_len: Option<usize>,
}

fn normalize_part(part: &str) -> String {
    part.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl TagName {
    /// Trim, case-fold and collapse whitespace; split namespace at the first `:`
    pub fn parse(raw: &str) -> CatalogResult<Self> {
        if raw.chars().any(char::is_control) {
            return Err(CatalogError::InvalidTag(format!("'{}' contains control characters", raw.escape_default())));
        }

        let (namespace, name) = match raw.split_once(':') {
            Some((ns, name)) => (Some(normalize_part(ns)), normalize_part(name)),
            None => (None, normalize_part(raw)),
        };

        if name.is_empty() {
            return Err(CatalogError::InvalidTag(format!("'{}' has an empty name", raw)));
        }

        let (full, namespace_len) = match namespace {
            Some(ns) if ns.is_empty() => {
                return Err(CatalogError::InvalidTag(format!("'{}' has an empty namespace", raw)))
            }
            Some(ns) => (format!("{}:{}", ns, name), Some(ns.len())),
            None => (name, None),
        };

        if full.chars().count() > MAX_TAG_LEN {
            return Err(CatalogError::InvalidTag(format!(
                "tag is longer than {} characters",
                MAX_TAG_LEN
            )));
        }

        Ok(Self { full, namespace_len })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace_len.map(|len| &self.full[..len])
    }

    /// Name without the namespace
    pub fn local(&self) -> &str {
        match self.namespace_len {
            Some(len) => &self.full[len + 1..],
            None => &self.full,
        }
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Outcome of attach/detach
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagChange {
    /// Record the tag was applied to (merge survivor of the requested one)
    pub fingerprint: Fingerprint,
    pub tag: String,
    /// False when the call was a no-op
    pub changed: bool,
}

/// One page of a tag's members
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagPage {
    pub tag: String,
    pub images: Vec<Fingerprint>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Clone)]
pub struct TagGraph {
    store: CatalogStore,
    event_bus: EventBus,
}

impl TagGraph {
    pub fn new(store: CatalogStore, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    async fn survivor(&self, fp: &Fingerprint) -> CatalogResult<Fingerprint> {
        self.store
            .resolve(fp)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("image {}", fp)))
    }

    /// Attach a tag; attaching a present tag is a no-op
    pub async fn attach(&self, fp: &Fingerprint, raw_tag: &str) -> CatalogResult<TagChange> {
        let tag = TagName::parse(raw_tag)?;
        let change = retry_transient("tags.attach", self.store.retry_policy(), || self.try_attach(fp, &tag)).await?;

        if change.changed {
            tracing::debug!(fingerprint = %change.fingerprint.short(), tag = %change.tag, "Tag attached");
            self.event_bus.emit_lossy(GopherEvent::TagAttached {
                fingerprint: change.fingerprint,
                tag: change.tag.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(change)
    }

    async fn try_attach(&self, fp: &Fingerprint, tag: &TagName) -> CatalogResult<TagChange> {
        let target = self.survivor(fp).await?;
        let _locks = self
            .store
            .locks()
            .acquire([LockKey::Image(target), LockKey::Tag(tag.as_str().to_string())])
            .await?;

        let mut tx = begin_monitored(self.store.pool(), "tags.attach").await?;
        let conn = tx.conn()?;

        match images::load(conn, &target).await? {
            None => return Err(CatalogError::NotFound(format!("image {}", fp))),
            Some(row) if row.status.is_merged() => {
                return Err(CatalogError::Conflict(format!("{} was merged concurrently", target.short())))
            }
            Some(_) => {}
        }

        let now = Utc::now();
        tags::ensure(conn, tag.as_str(), tag.namespace(), now).await?;
        let changed = tags::attach(conn, &target, tag.as_str(), now).await?;
        tx.commit().await?;

        Ok(TagChange {
            fingerprint: target,
            tag: tag.to_string(),
            changed,
        })
    }

    /// Detach a tag; detaching an absent tag is a no-op
    ///
    /// The tag itself stays in the vocabulary (see the retention policy).
    pub async fn detach(&self, fp: &Fingerprint, raw_tag: &str) -> CatalogResult<TagChange> {
        let tag = TagName::parse(raw_tag)?;
        let change = retry_transient("tags.detach", self.store.retry_policy(), || self.try_detach(fp, &tag)).await?;

        if change.changed {
            tracing::debug!(fingerprint = %change.fingerprint.short(), tag = %change.tag, "Tag detached");
            self.event_bus.emit_lossy(GopherEvent::TagDetached {
                fingerprint: change.fingerprint,
                tag: change.tag.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(change)
    }

    async fn try_detach(&self, fp: &Fingerprint, tag: &TagName) -> CatalogResult<TagChange> {
        let target = self.survivor(fp).await?;
        let _locks = self
            .store
            .locks()
            .acquire([LockKey::Image(target), LockKey::Tag(tag.as_str().to_string())])
            .await?;

        let mut tx = begin_monitored(self.store.pool(), "tags.detach").await?;
        let changed = tags::detach(tx.conn()?, &target, tag.as_str()).await?;
        tx.commit().await?;

        Ok(TagChange {
            fingerprint: target,
            tag: tag.to_string(),
            changed,
        })
    }

    /// Tags of an image (resolved through merges)
    pub async fn tags_for(&self, fp: &Fingerprint) -> CatalogResult<Vec<String>> {
        let target = self.survivor(fp).await?;
        retry_transient("tags.tags_for", self.store.retry_policy(), || async {
            let mut conn = self.store.pool().acquire().await?;
            tags::tags_for(&mut conn, &target).await
        })
        .await
    }

    /// One page of the images carrying a tag, in fingerprint order
    ///
    /// A tag nobody carries, whether unused or never created, is an empty page.
    pub async fn images_for(&self, raw_tag: &str, page: i64, page_size: Option<i64>) -> CatalogResult<TagPage> {
        let tag = TagName::parse(raw_tag)?;
        retry_transient("tags.images_for", self.store.retry_policy(), || async {
            // Count and page from one snapshot
            let mut tx = begin_monitored(self.store.pool(), "tags.images_for").await?;
            let conn = tx.conn()?;
            let total = tags::count_images(conn, tag.as_str()).await?;
            let Pagination {
                page,
                page_size,
                total_pages,
                offset,
            } = calculate_pagination(total, page, page_size);
            let images = tags::images_for(conn, tag.as_str(), page_size, offset).await?;
            tx.commit().await?;

            Ok(TagPage {
                tag: tag.to_string(),
                images,
                total,
                page,
                page_size,
                total_pages,
            })
        })
        .await
    }

    /// Vocabulary with member counts
    pub async fn list_tags(&self) -> CatalogResult<Vec<TagSummary>> {
        retry_transient("tags.list", self.store.retry_policy(), || async {
            let mut conn = self.store.pool().acquire().await?;
            tags::list(&mut conn).await
        })
        .await
    }

    /// Delete tags with no members (`prune-empty` retention)
    pub async fn prune_empty(&self) -> CatalogResult<Vec<String>> {
        let empty = retry_transient("tags.prune.scan", self.store.retry_policy(), || async {
            let mut conn = self.store.pool().acquire().await?;
            tags::list_empty(&mut conn).await
        })
        .await?;

        let mut pruned = Vec::new();
        for name in empty {
            let deleted = retry_transient("tags.prune", self.store.retry_policy(), || async {
                let _locks = self.store.locks().acquire([LockKey::Tag(name.clone())]).await?;
                let mut tx = begin_monitored(self.store.pool(), "tags.prune").await?;
                let deleted = tags::delete_if_empty(tx.conn()?, &name).await?;
                tx.commit().await?;
                Ok::<_, CatalogError>(deleted)
            })
            .await?;
            if deleted {
                pruned.push(name);
            }
        }

        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "Pruned empty tags");
        }
        Ok(pruned)
    }
}
