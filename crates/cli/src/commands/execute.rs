//! The `execute` subcommand

use crate::manifests::{load_arguments, load_environment, load_paths};
use artifact_cache::Cache;
use artifact_core::executor::{Executor, Outcome};
use artifact_core::keying::ActionRequest;
use artifact_core::tracer::{ExternalTracer, TimedTracer};
use artifact_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Tracer binary override; defaults to `fsatrace` on `PATH`
const TRACER_ENV: &str = "ARTIFACT_EXECUTOR_TRACER";
const DEFAULT_TRACER: &str = "fsatrace";

pub struct ExecuteArgs {
    pub cache: PathBuf,
    pub environment: PathBuf,
    pub program: PathBuf,
    pub arguments: PathBuf,
    pub inputs: PathBuf,
    pub outputs: PathBuf,
}

/// Execute or replay one action; the working directory is the caller's
pub fn run(args: &ExecuteArgs) -> Result<i32> {
    let cache = Cache::open(&args.cache)?;

    let request = ActionRequest {
        working_dir: std::env::current_dir()
            .map_err(|e| Error::io("current_dir", Path::new("."), e))?,
        environment: load_environment(&args.environment)?,
        program: args.program.clone(),
        arguments: load_arguments(&args.arguments)?,
        inputs: load_paths(&args.inputs)?,
        outputs: load_paths(&args.outputs)?,
    };

    let tracer_program =
        std::env::var(TRACER_ENV).unwrap_or_else(|_| DEFAULT_TRACER.to_string());
    let tracer = TimedTracer::new(ExternalTracer::new(tracer_program));

    // One temp root per process; sandboxes and trace logs live under it
    // and disappear with it.
    let temp_root = tempfile::Builder::new()
        .prefix("artifact-executor-")
        .tempdir()
        .map_err(|e| Error::io("tempdir", std::env::temp_dir(), e))?;

    let executor = Executor::new(&cache, &tracer, temp_root.path());
    match executor.execute(&request)? {
        Outcome::Hit { id, outputs } => {
            tracing::info!(action = %id, outputs = outputs.len(), "replayed from cache");
        }
        Outcome::Executed { id, outputs } => {
            tracing::info!(action = %id, outputs = outputs.len(), "executed and cached");
        }
    }
    Ok(0)
}
