//! Runtime settings for the catalog engine
//!
//! The burrow core never reads the TOML file itself; `main` resolves a
//! [`BurrowConfig`] and hands the engine plain values through
//! [`IngestSettings`].

use chrono::Duration;
use gopher_common::config::{BurrowConfig, TagRetention, TrustMode};
use std::time::Duration as StdDuration;

/// Plain values consumed by the catalog, coordinator and sweeper
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    pub trust_mode: TrustMode,
    /// Absence before a record becomes `missing`
    pub missing_grace: Duration,
    /// Bound on any per-key lock wait
    pub lock_timeout: StdDuration,
    pub storage_retry_attempts: u32,
    pub tag_retention: TagRetention,
    /// Purge `missing` records after this long; None keeps them
    pub missing_purge_after: Option<Duration>,
    pub sweep_interval: StdDuration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from(&BurrowConfig::default())
    }
}

impl From<&BurrowConfig> for IngestSettings {
    fn from(config: &BurrowConfig) -> Self {
        Self {
            trust_mode: config.ingest.trust_mode,
            missing_grace: Duration::seconds(config.ingest.missing_grace_secs.min(i64::MAX as u64) as i64),
            lock_timeout: StdDuration::from_millis(config.ingest.lock_timeout_ms),
            storage_retry_attempts: config.ingest.storage_retry_attempts,
            tag_retention: config.retention.tags,
            missing_purge_after: config
                .retention
                .missing_purge_after_days
                .map(|days| Duration::days(i64::from(days))),
            sweep_interval: StdDuration::from_secs(config.retention.sweep_interval_secs),
        }
    }
}
