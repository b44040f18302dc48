//! Content-addressed object store and path index
//!
//! The cache root contains three child directories:
//!
//! ```text
//! <root>/
//!   objects/      blobs named by lowercase hex SHA-256 digest
//!   path-index/   a mirror tree of absolute paths; each leaf stores
//!                 "<hash>|<size>" for the last observed content there
//!   actions/      one record per cached action, named by action id
//! ```
//!
//! Objects are written once and never rewritten; the path index is advisory
//! and keyed by mtime (a stamp older than its real file is stale). Blob
//! writes go through a temp sibling and an atomic rename so a racing reader
//! never observes a partial object.

use crate::manifest::FileStamp;
use crate::{Digest, Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const OBJECTS_SUBDIR: &str = "objects";
const PATH_INDEX_SUBDIR: &str = "path-index";
const ACTIONS_SUBDIR: &str = "actions";

/// Handle to a cache root directory
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open a cache root, creating the three child directories if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let cache = Self { root: root.into() };
        for dir in [
            cache.objects_dir(),
            cache.path_index_dir(),
            cache.actions_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| Error::io("create_dir_all", &dir, e))?;
        }
        Ok(cache)
    }

    /// The cache root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The blob directory
    #[must_use]
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_SUBDIR)
    }

    /// The path index directory
    #[must_use]
    pub fn path_index_dir(&self) -> PathBuf {
        self.root.join(PATH_INDEX_SUBDIR)
    }

    /// The action record directory
    #[must_use]
    pub fn actions_dir(&self) -> PathBuf {
        self.root.join(ACTIONS_SUBDIR)
    }

    /// Path of the blob for a digest
    #[must_use]
    pub fn object_path(&self, digest: &Digest) -> PathBuf {
        self.objects_dir().join(digest.as_hex())
    }

    /// Whether the blob for `digest` exists
    #[must_use]
    pub fn has_object(&self, digest: &Digest) -> bool {
        self.object_path(digest).exists()
    }

    /// Store an in-memory byte string as a blob and return its digest
    pub fn store_bytes(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::from_bytes(data);
        let path = self.object_path(&digest);
        if path.exists() {
            return Ok(digest);
        }

        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).map_err(|e| Error::io("create", &tmp_path, e))?;
        file.write_all(data)
            .map_err(|e| Error::io("write", &tmp_path, e))?;
        file.sync_all()
            .map_err(|e| Error::io("sync", &tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|e| Error::io("rename", &path, e))?;
        Ok(digest)
    }

    /// Copy a file into `objects/` under a known digest
    ///
    /// The copy lands via a temp sibling and an atomic rename; the stored
    /// blob is made owner-writable so the shrinker can later evict it. The
    /// digest is trusted, not recomputed (callers either just hashed the
    /// file or read it from a stamp).
    pub fn ingest_object_from(&self, source: &Path, digest: &Digest) -> Result<()> {
        let path = self.object_path(digest);
        if path.exists() {
            return Ok(());
        }

        let tmp_path = path.with_extension("tmp");
        fs::copy(source, &tmp_path).map_err(|e| Error::io("copy", source, e))?;
        make_owner_writable(&tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| Error::io("rename", &path, e))?;
        Ok(())
    }

    /// Load a blob, verifying its contents still match the digest
    pub fn read_object(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.object_path(digest);
        if !path.exists() {
            return Err(Error::missing(digest.as_hex()));
        }
        let data = fs::read(&path).map_err(|e| Error::io("read", &path, e))?;

        let computed = Digest::from_bytes(&data);
        if computed != *digest {
            return Err(Error::corrupt(format!(
                "object integrity check failed: expected {digest}, computed {computed}"
            )));
        }
        Ok(data)
    }

    /// Size of a blob in bytes without loading it
    pub fn object_size(&self, digest: &Digest) -> Result<u64> {
        let path = self.object_path(digest);
        let metadata = fs::metadata(&path).map_err(|e| Error::io("metadata", &path, e))?;
        Ok(metadata.len())
    }

    /// Delete a blob (no-op when absent)
    pub fn remove_object(&self, digest: &Digest) -> Result<()> {
        let path = self.object_path(digest);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| Error::io("remove_file", &path, e))?;
        Ok(())
    }

    /// List every blob digest in `objects/`
    ///
    /// Entries whose names are not well-formed digests (e.g. interrupted
    /// `.tmp` siblings) are skipped.
    pub fn list_objects(&self) -> Result<Vec<Digest>> {
        let dir = self.objects_dir();
        let mut digests = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io("read_dir", &dir, e))? {
            let entry = entry.map_err(|e| Error::io("read_dir_entry", &dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(name) = name.to_str()
                && let Ok(digest) = Digest::from_hex(name)
            {
                digests.push(digest);
            }
        }
        Ok(digests)
    }

    // ------------------------------------------------------------------
    // Path index
    // ------------------------------------------------------------------

    /// Location of the stamp file mirroring an absolute path
    pub fn stamp_path(&self, alias: &str) -> Result<PathBuf> {
        let relative = alias.strip_prefix('/').ok_or_else(|| {
            Error::invalid(format!("path index keys must be absolute: {alias}"))
        })?;
        Ok(self.path_index_dir().join(relative))
    }

    /// Read the recorded `(hash, size)` stamp for a path, if any
    pub fn read_stamp(&self, alias: &str) -> Result<Option<FileStamp>> {
        let path = self.stamp_path(alias)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io("read", &path, e)),
        };
        let line = text.trim_end_matches('\n');
        let (hash, size) = line
            .split_once('|')
            .ok_or_else(|| Error::corrupt(format!("malformed stamp for {alias}: {line}")))?;
        let digest = Digest::from_hex(hash)?;
        let size: u64 = size
            .parse()
            .map_err(|_| Error::corrupt(format!("malformed stamp size for {alias}: {line}")))?;
        Ok(Some(FileStamp { digest, size }))
    }

    /// Write the stamp for a path, creating parent directories
    pub fn write_stamp(&self, alias: &str, stamp: &FileStamp) -> Result<()> {
        let path = self.stamp_path(alias)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
        }
        let line = format!("{}|{}\n", stamp.digest.as_hex(), stamp.size);
        fs::write(&path, line).map_err(|e| Error::io("write", &path, e))?;
        Ok(())
    }

    /// Bump a stamp's mtime so it dominates the real file's mtime
    ///
    /// Used after output extraction: the freshly copied-out file is newer
    /// than its stamp, and without the bump the next `cache_file` would
    /// take the slow path for content it just wrote.
    pub fn touch_stamp(&self, alias: &str) -> Result<()> {
        let path = self.stamp_path(alias)?;
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .map_err(|e| Error::io("open", &path, e))?;
        file.set_modified(SystemTime::now())
            .map_err(|e| Error::io("set_modified", &path, e))?;
        Ok(())
    }

    /// Delete a stamp (no-op when absent)
    pub fn remove_stamp(&self, alias: &str) -> Result<()> {
        let path = self.stamp_path(alias)?;
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| Error::io("remove_file", &path, e))?;
        Ok(())
    }

    /// List every absolute path with a stamp in the index
    pub fn list_stamp_paths(&self) -> Result<Vec<String>> {
        let index_dir = self.path_index_dir();
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(&index_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&index_dir).map_err(|_| {
                Error::corrupt(format!(
                    "path index entry escapes the index: {}",
                    entry.path().display()
                ))
            })?;
            paths.push(format!("/{}", relative.to_string_lossy()));
        }
        Ok(paths)
    }

    /// Remove directories in `path-index/` left empty after stamp eviction
    pub fn prune_empty_index_dirs(&self) -> Result<()> {
        let index_dir = self.path_index_dir();
        for entry in walkdir::WalkDir::new(&index_dir)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() && entry.path() != index_dir {
                // Fails on non-empty directories, which is exactly the filter
                // we want.
                let _ = fs::remove_dir(entry.path());
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // File ingest
    // ------------------------------------------------------------------

    /// Ingest one file, recording its stamp under `alias`
    ///
    /// Fast path: when the stamp at `path-index/<alias>` is newer than the
    /// real file, the stored `(hash, size)` is returned without rehashing
    /// (re-copying the blob if it was evicted). Slow path: hash the file,
    /// ingest the blob, refresh the stamp.
    ///
    /// The fast path can return a stale stamp only if the file was mutated
    /// without advancing its mtime; that is accepted behavior.
    pub fn cache_file(&self, real_path: &Path, alias: Option<&str>) -> Result<FileStamp> {
        let real_str = real_path.to_string_lossy();
        let alias = alias.unwrap_or(&real_str);

        let real_mtime = match fs::metadata(real_path) {
            Ok(metadata) => metadata
                .modified()
                .map_err(|e| Error::io("modified", real_path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::missing(real_path.to_string_lossy()));
            }
            Err(e) => return Err(Error::io("metadata", real_path, e)),
        };

        if let Some(stamp) = self.read_stamp(alias)?
            && let Ok(stamp_meta) = fs::metadata(self.stamp_path(alias)?)
            && stamp_meta.modified().is_ok_and(|t| t > real_mtime)
        {
            if !self.has_object(&stamp.digest) {
                self.ingest_object_from(real_path, &stamp.digest)?;
            }
            tracing::trace!(path = %alias, digest = %stamp.digest, "path index fast path");
            return Ok(stamp);
        }

        let (digest, size) = Digest::from_file(real_path)?;
        if !self.has_object(&digest) {
            self.ingest_object_from(real_path, &digest)?;
        }
        let stamp = FileStamp { digest, size };
        self.write_stamp(alias, &stamp)?;
        tracing::debug!(path = %alias, digest = %stamp.digest, size, "cached file");
        Ok(stamp)
    }

    /// Whether `path` exists and its stamp is fresh (fast-path match)
    #[must_use]
    pub fn is_file_cached(&self, path: &Path) -> bool {
        let Ok(real_mtime) = fs::metadata(path).and_then(|m| m.modified()) else {
            return false;
        };
        let alias = path.to_string_lossy();
        let Ok(stamp_path) = self.stamp_path(&alias) else {
            return false;
        };
        fs::metadata(stamp_path)
            .and_then(|m| m.modified())
            .is_ok_and(|stamp_mtime| stamp_mtime > real_mtime)
    }
}

#[cfg(unix)]
fn make_owner_writable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path).map_err(|e| Error::io("metadata", path, e))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o200);
    fs::set_permissions(path, permissions).map_err(|e| Error::io("set_permissions", path, e))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_owner_writable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| Error::io("metadata", path, e))?;
    let mut permissions = metadata.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions).map_err(|e| Error::io("set_permissions", path, e))?;
    Ok(())
}
