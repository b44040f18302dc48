//! Content-addressed action cache for artifact-executor
//!
//! This crate provides the persistent half of the executor:
//! - A blob store keyed by SHA-256 content digest (`objects/`)
//! - A path index mirroring absolute paths to `(hash, size)` stamps
//!   (`path-index/`)
//! - Immutable action records tying a keyed action to its cached outputs
//!   (`actions/`)
//! - The interactive shrinker that removes selected actions and
//!   garbage-collects unreferenced blobs and stamps
//!
//! # Layout
//!
//! Every digest referenced by an action record, a manifest, or a path-index
//! stamp names a blob in `objects/` whose contents hash back to that
//! digest. Blobs are created on first reference and never rewritten; action
//! records are replaced atomically and are always the last write of a
//! successful execution, so an interrupted run can never leave a record
//! pointing at missing data.

mod action;
mod digest;
mod error;
mod manifest;
mod shrink;
mod store;

pub use action::{ActionEntry, ActionRecord};
pub use digest::Digest;
pub use error::{Error, Result};
pub use manifest::{FileStamp, Manifest};
pub use shrink::{
    ActionSummary, PromptChoice, ScriptedPrompt, ShrinkPrompt, ShrinkReport, TtyPrompt, shrink,
};
pub use store::Cache;
