//! Cache error type
//!
//! Four failure classes cover the whole crate: a filesystem call failed,
//! the request itself was unserviceable, an entry that should exist is
//! gone, or stored bytes no longer parse. Callers build them through the
//! short constructors below so call sites stay one line.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// What went wrong inside the cache layer
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A filesystem call on the cache tree or an ingested file failed
    #[error("{op} {path}: {source}")]
    #[diagnostic(code(artifact::cache::io))]
    Io {
        /// The call that failed (`open`, `rename`, `create_dir_all`, ...)
        op: &'static str,
        /// What it was called on
        path: String,
        /// The error the OS reported
        #[source]
        source: std::io::Error,
    },

    /// The request cannot be served as asked (relative alias, reserved
    /// characters in a manifest path, ...)
    #[error("invalid cache request: {reason}")]
    #[diagnostic(code(artifact::cache::invalid))]
    InvalidRequest {
        /// Why the request was refused
        reason: String,
    },

    /// An object, stamp, or action record that should exist does not
    #[error("cache entry missing: {entry}")]
    #[diagnostic(
        code(artifact::cache::missing),
        help("it may never have been published, or the shrinker may have swept it")
    )]
    Missing {
        /// The digest or path that could not be resolved
        entry: String,
    },

    /// Stored bytes that should be well-formed are not
    #[error("unreadable cache data: {detail}")]
    #[diagnostic(
        code(artifact::cache::corrupt),
        help("the cache was modified by something other than artifact-executor")
    )]
    Corrupt {
        /// What failed to parse or verify
        detail: String,
    },
}

impl Error {
    /// A failed filesystem call, named op-first to read like the call site
    #[must_use]
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// An unserviceable request
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// A missing object, stamp, or record
    #[must_use]
    pub fn missing(entry: impl Into<String>) -> Self {
        Self::Missing {
            entry: entry.into(),
        }
    }

    /// Malformed or mismatching stored bytes
    #[must_use]
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
