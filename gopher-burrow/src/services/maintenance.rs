//! Maintenance sweeper
//!
//! Background task that applies the time-based policies no scan report
//! triggers on its own: missing promotion once the grace period runs out,
//! the tag retention policy, and purging of long-missing records.

use crate::catalog::CatalogStore;
use crate::config::IngestSettings;
use crate::error::CatalogResult;
use crate::services::tag_graph::TagGraph;
use chrono::{DateTime, Utc};
use gopher_common::config::TagRetention;
use gopher_common::events::{EventBus, GopherEvent};
use gopher_common::Fingerprint;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub promoted_missing: Vec<Fingerprint>,
    pub pruned_tags: Vec<String>,
    pub purged: Vec<Fingerprint>,
}

pub struct MaintenanceSweeper {
    store: CatalogStore,
    tags: TagGraph,
    event_bus: EventBus,
    settings: IngestSettings,
}

impl MaintenanceSweeper {
    pub fn new(store: CatalogStore, tags: TagGraph, event_bus: EventBus, settings: IngestSettings) -> Self {
        Self {
            store,
            tags,
            event_bus,
            settings,
        }
    }

    /// Run one sweep as of `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> CatalogResult<SweepReport> {
        let mut report = SweepReport {
            promoted_missing: self.store.sweep_missing(now, self.settings.missing_grace).await?,
            ..Default::default()
        };

        for fingerprint in &report.promoted_missing {
            self.event_bus.emit_lossy(GopherEvent::ImageMissing {
                fingerprint: *fingerprint,
                timestamp: now,
            });
        }

        if let Some(after) = self.settings.missing_purge_after {
            report.purged = self.store.purge_missing(now - after).await?;
        }

        // After purging, which can empty tags
        if self.settings.tag_retention == TagRetention::PruneEmpty {
            report.pruned_tags = self.tags.prune_empty().await?;
        }

        Ok(report)
    }

    /// Spawn the periodic sweep; stops when `shutdown` is cancelled
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        info!(
            "Starting maintenance sweeper (interval: {}s, tags: {:?}, purge after: {:?})",
            self.settings.sweep_interval.as_secs(),
            self.settings.tag_retention,
            self.settings.missing_purge_after.map(|d| d.num_days())
        );

        tokio::spawn(async move {
            let mut timer = interval(self.settings.sweep_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Maintenance sweeper stopping");
                        break;
                    }
                    _ = timer.tick() => {}
                }

                match self.sweep_once(Utc::now()).await {
                    Ok(report) => debug!(
                        promoted = report.promoted_missing.len(),
                        pruned = report.pruned_tags.len(),
                        purged = report.purged.len(),
                        "Maintenance sweep finished"
                    ),
                    Err(e) => error!("Maintenance sweep failed: {}", e),
                }
            }
        })
    }
}
