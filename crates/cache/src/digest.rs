//! Content digests
//!
//! Every blob, manifest, and action component is identified by its SHA-256
//! digest, hex-encoded lowercase. The digest doubles as the object's file
//! name under `objects/`.

use crate::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::io::Read;
use std::path::Path;

/// A content digest (SHA-256 hash as lowercase hex string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of an in-memory byte string
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hex::encode(hash))
    }

    /// Compute the digest of a file's contents without loading it whole
    ///
    /// Returns the digest and the file size in bytes.
    pub fn from_file(path: &Path) -> Result<(Self, u64)> {
        let file = std::fs::File::open(path).map_err(|e| Error::io("open", path, e))?;
        let mut reader = std::io::BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| Error::io("read", path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok((Self(hex::encode(hasher.finalize())), size))
    }

    /// Create from a hex string (validation)
    ///
    /// # Errors
    ///
    /// Returns error if the hex string is invalid or wrong length
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.len() != 64 {
            return Err(Error::corrupt(format!(
                "digest must be 64 hex characters, got {}",
                s.len()
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(Error::corrupt(format!(
                "digest must contain only lowercase hex digits: {s}"
            )));
        }
        Ok(Self(s))
    }

    /// Get the hex representation
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_from_bytes() {
        let digest = Digest::from_bytes(b"hello world");
        // SHA-256 of "hello world"
        assert_eq!(
            digest.as_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_from_file_matches_bytes() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"hello world").unwrap();

        let (digest, size) = Digest::from_file(tmp.path()).unwrap();
        assert_eq!(digest, Digest::from_bytes(b"hello world"));
        assert_eq!(size, 11);
    }

    #[test]
    fn test_digest_validation() {
        // Valid
        assert!(
            Digest::from_hex("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .is_ok()
        );

        // Too short
        assert!(Digest::from_hex("abc").is_err());

        // Uppercase is rejected; object names are lowercase
        assert!(
            Digest::from_hex("0123456789ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef")
                .is_err()
        );

        // Invalid characters
        assert!(
            Digest::from_hex("xyz3456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .is_err()
        );
    }
}
