//! One sighting of a file, as applied to the catalog

use chrono::{DateTime, Utc};
use gopher_common::Fingerprint;

/// A scan entry after identity resolution
///
/// `observed_at` comes from the scan report, never from the burrow clock,
/// so applying the same report twice writes the same timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub scanner_id: String,
    pub session_id: String,
    pub path: String,
    pub fingerprint: Fingerprint,
    pub byte_size: u64,
    pub modified_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}
