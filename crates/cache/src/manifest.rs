//! File manifests
//!
//! A manifest is a sorted, line-oriented record of files: one
//! `"<absolute-path>|<hash>|<size>"` entry per file, ordered byte-wise over
//! the path field, LF-separated. Inputs manifests and outputs manifests
//! share this format, so two identical logical manifests always serialize
//! to the same bytes and hash to the same digest.

use crate::{Digest, Error, Result};
use std::collections::BTreeMap;

/// The recorded `(hash, size)` for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    /// Content digest of the file
    pub digest: Digest,
    /// File size in bytes
    pub size: u64,
}

/// A sorted set of `path -> (hash, size)` entries
///
/// Keys are absolute path strings; the `BTreeMap` gives the canonical
/// byte-wise ordering for free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, FileStamp>,
}

impl Manifest {
    /// Create an empty manifest
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous stamp for the same path
    ///
    /// # Errors
    ///
    /// Returns error if the path is not absolute or contains a field
    /// delimiter or newline.
    pub fn insert(&mut self, path: impl Into<String>, digest: Digest, size: u64) -> Result<()> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(Error::invalid(format!(
                "manifest paths must be absolute: {path}"
            )));
        }
        if path.contains('|') || path.contains('\n') {
            return Err(Error::invalid(format!(
                "manifest paths must not contain '|' or newline: {path}"
            )));
        }
        self.entries.insert(path, FileStamp { digest, size });
        Ok(())
    }

    /// Whether the manifest has an entry for `path`
    #[must_use]
    pub fn contains_path(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Iterate entries in canonical (path byte-wise) order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileStamp)> {
        self.entries.iter().map(|(p, s)| (p.as_str(), s))
    }

    /// Iterate the paths in canonical order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the canonical line format
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        for (path, stamp) in &self.entries {
            out.push_str(path);
            out.push('|');
            out.push_str(stamp.digest.as_hex());
            out.push('|');
            out.push_str(&stamp.size.to_string());
            out.push('\n');
        }
        out
    }

    /// Parse the canonical line format
    ///
    /// # Errors
    ///
    /// Returns error if any line does not have exactly three fields, the
    /// digest is malformed, or the size is not a decimal integer.
    pub fn parse(text: &str) -> Result<Self> {
        let mut manifest = Self::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.rsplitn(3, '|');
            let size = fields
                .next()
                .ok_or_else(|| Error::corrupt(format!("manifest line missing size: {line}")))?;
            let hash = fields
                .next()
                .ok_or_else(|| Error::corrupt(format!("manifest line missing hash: {line}")))?;
            let path = fields
                .next()
                .ok_or_else(|| Error::corrupt(format!("manifest line missing path: {line}")))?;
            let digest = Digest::from_hex(hash)?;
            let size: u64 = size
                .parse()
                .map_err(|_| Error::corrupt(format!("manifest size is not an integer: {line}")))?;
            manifest.insert(path, digest, size)?;
        }
        Ok(manifest)
    }
}
