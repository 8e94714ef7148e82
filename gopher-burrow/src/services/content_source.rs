//! Byte access for fingerprint recomputation
//!
//! Untrusted mode hashes the entry's bytes itself. The bytes come from, in
//! order: inline `bytes_b64`, the `bytes_ref` path, or the entry path.

use crate::error::{CatalogError, CatalogResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gopher_common::api::ScanEntry;
use gopher_common::fingerprint::identify_expecting;
use gopher_common::Fingerprint;
use std::path::{Path, PathBuf};

/// Source of the bytes behind a scan entry
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fingerprint the entry's bytes, checking them against the reported size
    async fn identify_entry(&self, entry: &ScanEntry) -> CatalogResult<Fingerprint>;
}

/// Decode inline content
pub fn decode_inline(encoded: &str) -> CatalogResult<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| CatalogError::MalformedReport(format!("invalid base64 content: {}", e)))
}

/// Hash a file on the blocking pool
pub async fn identify_file(path: &Path, expected_size: u64) -> CatalogResult<Fingerprint> {
    let path_buf = path.to_path_buf();
    tracing::trace!(path = %path_buf.display(), "Hashing file");

    tokio::task::spawn_blocking(move || -> CatalogResult<Fingerprint> {
        let file = std::fs::File::open(&path_buf).map_err(|e| {
            CatalogError::UnreadableInput(format!("cannot open {}: {}", path_buf.display(), e))
        })?;
        Ok(identify_expecting(file, expected_size)?)
    })
    .await
    .map_err(|e| CatalogError::Internal(format!("Hash task failed: {}", e)))?
}

/// Reads bytes from the burrow's own filesystem
#[derive(Debug, Clone, Default)]
pub struct FsContentSource {
    /// Prefix applied to relative `bytes_ref` paths
    root: Option<PathBuf>,
}

impl FsContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative byte references against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn identify_entry(&self, entry: &ScanEntry) -> CatalogResult<Fingerprint> {
        if let Some(encoded) = &entry.bytes_b64 {
            let bytes = decode_inline(encoded)?;
            return Ok(identify_expecting(bytes.as_slice(), entry.size)?);
        }

        let path = match &entry.bytes_ref {
            Some(reference) => self.resolve(reference),
            None => PathBuf::from(&entry.path),
        };
        identify_file(&path, entry.size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Write;

    fn entry(path: &str, size: u64) -> ScanEntry {
        ScanEntry {
            path: path.to_string(),
            size,
            fingerprint: None,
            bytes_ref: None,
            bytes_b64: None,
            mtime: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inline_bytes_take_precedence() {
        let mut e = entry("/does/not/exist.jpg", 5);
        e.bytes_b64 = Some(STANDARD.encode(b"hello"));
        let fp = FsContentSource::new().identify_entry(&e).await.unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(b"hello"));
    }

    #[tokio::test]
    async fn test_bytes_ref_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("a.jpg")).unwrap();
        file.write_all(b"jpeg bytes").unwrap();

        let mut e = entry("/scanner/side/a.jpg", 10);
        e.bytes_ref = Some("a.jpg".to_string());
        let fp = FsContentSource::with_root(dir.path()).identify_entry(&e).await.unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(b"jpeg bytes"));
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let e = entry("/definitely/not/here.jpg", 1);
        let err = FsContentSource::new().identify_entry(&e).await.unwrap_err();
        assert!(matches!(err, CatalogError::UnreadableInput(_)));
    }

    #[tokio::test]
    async fn test_truncated_inline_bytes_are_unreadable() {
        let mut e = entry("/a.jpg", 100);
        e.bytes_b64 = Some(STANDARD.encode(b"short"));
        let err = FsContentSource::new().identify_entry(&e).await.unwrap_err();
        assert!(matches!(err, CatalogError::UnreadableInput(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_inline("!!!"), Err(CatalogError::MalformedReport(_))));
    }
}
