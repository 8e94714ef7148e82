//! HTTP API handlers for gopher-burrow
//!
//! Gatherers submit scan reports; the web portal reads images and tags,
//! edits tags and requests merges.

pub mod health;
pub mod images;
pub mod libraries;
pub mod scan_reports;
pub mod settings;
pub mod sse;
pub mod tags;

pub use health::health_routes;
pub use images::image_routes;
pub use libraries::library_routes;
pub use scan_reports::scan_report_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
pub use tags::tag_routes;

use crate::error::ApiError;
use gopher_common::Fingerprint;

/// Parse a fingerprint path segment
pub(crate) fn parse_fingerprint(raw: &str) -> Result<Fingerprint, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not a 64 character hex fingerprint", raw)))
}
