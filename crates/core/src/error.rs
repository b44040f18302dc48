//! Executor error types
//!
//! Every fatal condition an action can hit has its own variant, so the CLI
//! can render a precise diagnostic and tests can match on the exact
//! failure. Warnings (identical-content escapes, untouched declared
//! inputs, undeclared outputs) are logged at the call site instead and
//! never appear here.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// The impossible trace transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceViolation {
    /// A path was deleted before anything wrote it
    DeleteBeforeWrite,
    /// A path that had only been read was deleted
    ReadThenDelete,
    /// A deleted path was read back
    DeleteThenRead,
    /// A deleted path was deleted again
    DoubleDelete,
}

impl std::fmt::Display for TraceViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::DeleteBeforeWrite => "delete before write",
            Self::ReadThenDelete => "read then delete",
            Self::DeleteThenRead => "delete then read",
            Self::DoubleDelete => "double delete",
        };
        write!(f, "{text}")
    }
}

/// What stopped an action
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Cache layer error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] artifact_cache::Error),

    /// A filesystem call outside the cache failed
    #[error("{op} {path}: {source}")]
    #[diagnostic(code(artifact::core::io))]
    Io {
        /// The call that failed
        op: &'static str,
        /// What it was called on
        path: String,
        /// The error the OS reported
        #[source]
        source: std::io::Error,
    },

    /// Missing or unusable configuration
    #[error("configuration error: {message}")]
    #[diagnostic(code(artifact::core::config))]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// A declared input, sandbox file, or cached object is absent on disk
    #[error("no such file: {path}")]
    #[diagnostic(
        code(artifact::core::not_found),
        help("declared inputs and outputs must exist as files on disk")
    )]
    NotFound {
        /// The missing path
        path: String,
    },

    /// On a cache hit, a recomputed sub-digest disagrees with the record
    #[error("action record digest mismatch for {component}: recorded {recorded}, computed {computed}")]
    #[diagnostic(
        code(artifact::core::hash_mismatch),
        help("the action record is corrupt; remove it with the shrinker")
    )]
    HashMismatch {
        /// Which of the five key components disagreed
        component: &'static str,
        /// Digest stored in the action record
        recorded: String,
        /// Digest computed from the current request
        computed: String,
    },

    /// A traced access escaped the sandbox and touched diverging content
    #[error("non-hermetic access to {path}: contents differ from the sandboxed copy")]
    #[diagnostic(
        code(artifact::core::non_hermetic),
        help("declare the file as an input so it is staged into the sandbox")
    )]
    NonHermeticDivergent {
        /// The out-of-sandbox path
        path: String,
    },

    /// The program read a file that was not declared as an input
    #[error("undeclared input: {path}")]
    #[diagnostic(
        code(artifact::core::undeclared_input),
        help("add the path to the inputs manifest")
    )]
    UndeclaredInput {
        /// The undeclared path
        path: String,
    },

    /// A declared output was never written by the program
    #[error("missing output: {path}")]
    #[diagnostic(
        code(artifact::core::missing_output),
        help("the program did not produce this declared output")
    )]
    MissingOutput {
        /// The declared but unwritten path
        path: String,
    },

    /// The trace fold observed an impossible transition
    #[error("invalid trace transition for {path}: {violation}")]
    #[diagnostic(code(artifact::core::trace_state))]
    TraceState {
        /// Which transition was impossible
        violation: TraceViolation,
        /// The path whose event stream was inconsistent
        path: String,
    },

    /// The tracer subprocess failed or produced unparseable events
    #[error("tracer failure: {message}")]
    #[diagnostic(code(artifact::core::tracer))]
    TracerFailure {
        /// Description of the tracer problem
        message: String,
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

    /// A configuration problem
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// A path that should exist but does not
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// A tracer failure
    #[must_use]
    pub fn tracer(message: impl Into<String>) -> Self {
        Self::TracerFailure {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
