//! Image records and related catalog views

use chrono::{DateTime, Utc};
use gopher_common::Fingerprint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Processing status of an image record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Sighted only by the session that created it
    New,
    /// Sighted again by a later session
    Active,
    /// Every location absent beyond the grace period
    Missing,
    /// Merged; references forward to the survivor
    MergedInto(Fingerprint),
}

impl ImageStatus {
    /// Column value (`merged` for merged records; the target lives in `merged_into`)
    pub fn as_column(&self) -> &'static str {
        match self {
            ImageStatus::New => "new",
            ImageStatus::Active => "active",
            ImageStatus::Missing => "missing",
            ImageStatus::MergedInto(_) => "merged",
        }
    }

    /// Rebuild from the `status` and `merged_into` columns
    pub fn from_columns(status: &str, merged_into: Option<Fingerprint>) -> Option<Self> {
        match (status, merged_into) {
            ("new", _) => Some(ImageStatus::New),
            ("active", _) => Some(ImageStatus::Active),
            ("missing", _) => Some(ImageStatus::Missing),
            ("merged", Some(target)) => Some(ImageStatus::MergedInto(target)),
            _ => None,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, ImageStatus::MergedInto(_))
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageStatus::MergedInto(target) => write!(f, "merged-into:{}", target),
            other => f.write_str(other.as_column()),
        }
    }
}

impl Serialize for ImageStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ImageStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if let Some(target) = text.strip_prefix("merged-into:") {
            let fp = target.parse().map_err(serde::de::Error::custom)?;
            return Ok(ImageStatus::MergedInto(fp));
        }
        ImageStatus::from_columns(&text, None)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status '{}'", text)))
    }
}

/// A known file location of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLocation {
    pub scanner_id: String,
    pub path: String,
    pub last_observed: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Session that last reported this path
    pub last_session: String,
    /// First complete scan that did not report this path (None = present)
    pub missing_since: Option<DateTime<Utc>>,
}

/// Canonical catalog entry for one byte content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub fingerprint: Fingerprint,
    pub byte_size: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: ImageStatus,
    /// When the record last had no present location (None = present)
    pub absent_since: Option<DateTime<Utc>>,
    pub locations: Vec<FileLocation>,
    pub tags: Vec<String>,
}

/// Row of the merge history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub merge_id: String,
    pub from: Fingerprint,
    pub into: Fingerprint,
    pub reason: Option<String>,
    pub locations_moved: u64,
    pub tags_moved: u64,
    pub merged_at: DateTime<Utc>,
}

/// Record counts per status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub images_new: i64,
    pub images_active: i64,
    pub images_missing: i64,
    pub images_merged: i64,
    pub locations: i64,
    pub tags: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_status_text_form() {
        let target = Fingerprint::of_bytes(b"survivor");
        let status = ImageStatus::MergedInto(target);
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, format!("\"merged-into:{}\"", target));

        let back: ImageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_status_columns() {
        assert_eq!(ImageStatus::from_columns("new", None), Some(ImageStatus::New));
        assert_eq!(ImageStatus::from_columns("merged", None), None);
        assert_eq!(ImageStatus::Missing.as_column(), "missing");
    }
}
