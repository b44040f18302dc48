//! Execution core for artifact-executor
//!
//! Turns a request `(working directory, environment, program, arguments,
//! declared inputs, declared outputs)` into either a cache replay or a
//! sandboxed, traced execution:
//!
//! - [`keying`] canonicalizes the five key components and derives the
//!   action identifier
//! - [`sandbox`] stages inputs into a temporary mirror tree, rebases
//!   environment paths, and checks hermeticity of escaped accesses
//! - [`trace`] folds the tracer's event stream into per-path
//!   input/output classifications
//! - [`tracer`] abstracts the external tracing tool
//! - [`executor`] ties the pieces together and publishes action records
//!
//! Everything runs single-threaded with blocking child processes; the
//! cache is single-writer by contract.

pub mod executor;
pub mod keying;
pub mod sandbox;
pub mod trace;
pub mod tracer;

mod error;

pub use error::{Error, Result, TraceViolation};
pub use executor::{Executor, Outcome};
pub use keying::{ActionKey, ActionRequest, key_action};
pub use sandbox::{EnvRebase, Sandbox, rebase_paths_in_environment};
pub use trace::{AccessSets, FileState, TraceEvent, classify, fold, parse_trace};
pub use tracer::{ExternalTracer, TimedTracer, TracedCommand, Tracer};
