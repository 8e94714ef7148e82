//! Content identity for image files
//!
//! A fingerprint is the SHA-256 digest of the file bytes. It is the stable
//! identity of an image record: equal bytes always give the same fingerprint,
//! different bytes give different fingerprints under normal operation.
//!
//! Fingerprints order byte-lexically. That order is also the global lock
//! order the burrow uses when an operation touches two records.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

/// Digest length in bytes
pub const FINGERPRINT_LEN: usize = 32;

/// Read buffer size used while hashing (1 MiB)
const CHUNK_SIZE: usize = 1024 * 1024;

/// Content identity errors
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The byte stream could not be fully consumed
    #[error("Unreadable input: {0}")]
    UnreadableInput(String),

    /// Text form of a fingerprint is not 64 hex characters
    #[error("Invalid fingerprint '{0}': expected {len} hex characters", len = FINGERPRINT_LEN * 2)]
    InvalidFingerprint(String),
}

/// SHA-256 content fingerprint
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Wrap a raw digest
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Fingerprint of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    /// Lowercase hex form (64 characters)
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(FINGERPRINT_LEN * 2);
        for byte in self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Shortened form for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = IdentityError;

    /// Parse the hex form; upper-case hex is accepted and normalized
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != FINGERPRINT_LEN * 2 || !trimmed.is_ascii() {
            return Err(IdentityError::InvalidFingerprint(s.to_string()));
        }

        let mut bytes = [0u8; FINGERPRINT_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &trimmed[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| IdentityError::InvalidFingerprint(s.to_string()))?;
        }

        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Compute the fingerprint of a byte stream
///
/// Reads the stream to the end in 1 MiB chunks. Any read failure
/// yields `UnreadableInput`; the caller must not register a record for it.
pub fn identify<R: Read>(reader: R) -> Result<Fingerprint, IdentityError> {
    identify_counting(reader).map(|(fingerprint, _)| fingerprint)
}

/// Compute the fingerprint and check the byte count against the reported size
///
/// A short read means the file was truncated (or is still being written),
/// which is reported as `UnreadableInput`.
pub fn identify_expecting<R: Read>(
    reader: R,
    expected_size: u64,
) -> Result<Fingerprint, IdentityError> {
    let (fingerprint, consumed) = identify_counting(reader)?;
    if consumed != expected_size {
        return Err(IdentityError::UnreadableInput(format!(
            "size mismatch: read {} bytes, expected {}",
            consumed, expected_size
        )));
    }
    Ok(fingerprint)
}

fn identify_counting<R: Read>(mut reader: R) -> Result<(Fingerprint, u64), IdentityError> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut consumed: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(IdentityError::UnreadableInput(format!(
                    "read failed after {} bytes: {}",
                    consumed, e
                )))
            }
        };

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
        consumed += bytes_read as u64;
    }

    Ok((Fingerprint(hasher.finalize().into()), consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Cursor;

    /// Reader that fails after yielding some bytes
    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "device went away",
                ));
            }
            let n = self.remaining.min(buf.len());
            buf[..n].fill(0xAB);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_identify_is_deterministic() {
        let data = b"\xFF\xD8\xFF\xE0 pretend jpeg";
        let a = identify(Cursor::new(data)).unwrap();
        let b = identify(Cursor::new(data)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Fingerprint::of_bytes(data));
    }

    #[test]
    fn test_known_digest_of_empty_input() {
        let fp = identify(Cursor::new(Vec::<u8>::new())).unwrap();
        assert_eq!(
            fp.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_single_byte_differences_give_distinct_fingerprints() {
        let base: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut seen = HashSet::new();
        seen.insert(Fingerprint::of_bytes(&base));

        for position in 0..base.len() {
            let mut variant = base.clone();
            variant[position] ^= 0x01;
            assert!(
                seen.insert(Fingerprint::of_bytes(&variant)),
                "collision when flipping byte {}",
                position
            );
        }

        assert_eq!(seen.len(), base.len() + 1);
    }

    #[test]
    fn test_read_failure_is_unreadable_input() {
        let result = identify(FailingReader { remaining: 10 });
        assert!(matches!(result, Err(IdentityError::UnreadableInput(_))));
    }

    #[test]
    fn test_truncated_stream_detected_by_expected_size() {
        let data = vec![7u8; 100];
        let result = identify_expecting(Cursor::new(&data[..60]), 100);
        assert!(matches!(result, Err(IdentityError::UnreadableInput(_))));

        let ok = identify_expecting(Cursor::new(&data), 100).unwrap();
        assert_eq!(ok, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn test_hex_parse_accepts_uppercase_and_normalizes() {
        let fp = Fingerprint::of_bytes(b"abc");
        let upper = fp.to_hex().to_uppercase();
        let parsed: Fingerprint = upper.parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(parsed.to_string(), fp.to_hex());
    }

    #[test]
    fn test_hex_parse_rejects_bad_input() {
        assert!("abc".parse::<Fingerprint>().is_err());
        assert!("zz".repeat(32).parse::<Fingerprint>().is_err());
        assert!("é".repeat(64).parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_ordering_is_byte_lexical() {
        let low = Fingerprint::from_bytes([0u8; 32]);
        let mut high_bytes = [0u8; 32];
        high_bytes[0] = 1;
        let high = Fingerprint::from_bytes(high_bytes);
        assert!(low < high);
        assert!(low.to_hex() < high.to_hex());
    }
}
