//! Action execution
//!
//! Orchestrates one action end to end: key it, replay from the cache on a
//! hit, otherwise run the program in a sandbox under the tracer, reconcile
//! the traced accesses with the declarations, cache the results, and
//! publish the action record.
//!
//! The record is the last write of a miss. A run killed at any earlier
//! point leaves only content-addressed blobs and stamps behind, all of
//! which are safe to observe, so the cache never holds a record pointing
//! at unpublished data.

use crate::keying::{ActionKey, ActionRequest, key_action};
use crate::sandbox::{EnvRebase, Sandbox, rebase_paths_in_environment};
use crate::trace::{classify, fold, parse_trace};
use crate::tracer::{TracedCommand, Tracer};
use crate::{Error, Result};
use artifact_cache::{ActionRecord, Cache, Digest, Manifest};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

/// How a request was satisfied
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Outputs were replayed from a cached action record
    Hit {
        /// The action identifier
        id: Digest,
        /// The replayed outputs manifest
        outputs: Manifest,
    },
    /// The program was executed and the action published
    Executed {
        /// The action identifier
        id: Digest,
        /// The freshly cached outputs manifest
        outputs: Manifest,
    },
}

impl Outcome {
    /// The action identifier
    #[must_use]
    pub fn id(&self) -> &Digest {
        match self {
            Self::Hit { id, .. } | Self::Executed { id, .. } => id,
        }
    }

    /// The outputs manifest
    #[must_use]
    pub fn outputs(&self) -> &Manifest {
        match self {
            Self::Hit { outputs, .. } | Self::Executed { outputs, .. } => outputs,
        }
    }
}

/// One-action-at-a-time executor over a cache, a tracer, and a temp root
pub struct Executor<'a> {
    cache: &'a Cache,
    tracer: &'a dyn Tracer,
    temp_root: &'a Path,
    rebase: EnvRebase,
}

impl<'a> Executor<'a> {
    /// Create an executor with the default environment-rebasing rule
    #[must_use]
    pub fn new(cache: &'a Cache, tracer: &'a dyn Tracer, temp_root: &'a Path) -> Self {
        Self {
            cache,
            tracer,
            temp_root,
            rebase: rebase_paths_in_environment,
        }
    }

    /// Replace the environment-rebasing rule
    #[must_use]
    pub fn with_rebase(mut self, rebase: EnvRebase) -> Self {
        self.rebase = rebase;
        self
    }

    /// Execute or replay one action
    pub fn execute(&self, request: &ActionRequest) -> Result<Outcome> {
        let key = key_action(self.cache, request)?;
        if self.cache.has_action(&key.id) {
            self.replay(&key)
        } else {
            self.run_and_publish(request, &key)
        }
    }

    /// Restore the outputs of a previously recorded action
    fn replay(&self, key: &ActionKey) -> Result<Outcome> {
        let record = self.cache.load_action(&key.id)?;

        // The freshly computed key must agree with the stored record on
        // every field; a disagreement means the record is corrupt, not
        // that re-execution is wanted.
        let checks: [(&'static str, &Digest, &Digest); 5] = [
            ("working directory", &record.wd, &key.wd),
            ("environment", &record.env, &key.env),
            ("program", &record.prog, &key.prog),
            ("arguments", &record.args, &key.args),
            ("inputs manifest", &record.inputs_manifest, &key.inputs_manifest),
        ];
        for (component, recorded, computed) in checks {
            if recorded != computed {
                return Err(Error::HashMismatch {
                    component,
                    recorded: recorded.as_hex().to_string(),
                    computed: computed.as_hex().to_string(),
                });
            }
        }

        let outputs = self.read_manifest(&record.outputs_manifest)?;
        for (path, stamp) in outputs.iter() {
            if !self.cache.has_object(&stamp.digest) {
                return Err(Error::not_found(stamp.digest.as_hex()));
            }
            let destination = Path::new(path);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io("create_dir_all", parent, e))?;
            }
            std::fs::copy(self.cache.object_path(&stamp.digest), destination)
                .map_err(|e| Error::io("copy", destination, e))?;
        }

        tracing::info!(action = %key.id, outputs = outputs.len(), "cache hit");
        Ok(Outcome::Hit {
            id: key.id.clone(),
            outputs,
        })
    }

    /// Run the program in a sandbox, reconcile, cache, and publish
    fn run_and_publish(&self, request: &ActionRequest, key: &ActionKey) -> Result<Outcome> {
        let started = Instant::now();
        let sandbox = Sandbox::create(self.temp_root)?;

        for path in key.inputs.paths() {
            sandbox.stage_file(path)?;
        }
        sandbox.mirror_working_dir(&request.working_dir)?;

        let environment = (self.rebase)(sandbox.root(), &request.environment);
        let command = TracedCommand {
            program: sandbox.sandbox_path(&key.program_path)?,
            arguments: request.arguments.clone(),
            working_dir: sandbox.sandbox_path(&request.working_dir.to_string_lossy())?,
            environment,
        };

        let trace_file = tempfile::Builder::new()
            .prefix("trace-")
            .suffix(".log")
            .tempfile_in(self.temp_root)
            .map_err(|e| Error::io("tempfile", self.temp_root, e))?;
        let log = self.tracer.run_traced(&command, trace_file.path())?;

        let states = fold(parse_trace(&log)?)?;
        let traced = classify(&states);

        sandbox.check_hermetic_files(
            traced
                .inputs
                .iter()
                .chain(traced.outputs.iter())
                .map(String::as_str),
        )?;

        // Reconcile traced reads against the inputs manifest (which already
        // includes the program).
        let mut touched_inputs: BTreeSet<&str> = BTreeSet::new();
        for path in &traced.inputs {
            let original = sandbox.strip_prefix(path).unwrap_or(path);
            if original.starts_with("/proc/") {
                continue;
            }
            if !key.inputs.contains_path(original) {
                return Err(Error::UndeclaredInput {
                    path: original.to_string(),
                });
            }
            touched_inputs.insert(original);
        }
        for declared in key.inputs.paths() {
            if !touched_inputs.contains(declared) {
                tracing::warn!(path = %declared, "declared input was never read");
            }
        }

        // Reconcile traced writes against the declared outputs.
        let traced_outputs: BTreeSet<&str> = traced
            .outputs
            .iter()
            .map(|path| sandbox.strip_prefix(path).unwrap_or(path))
            .collect();
        let declared_outputs: BTreeSet<&str> =
            request.outputs.iter().map(String::as_str).collect();
        for declared in &declared_outputs {
            if !traced_outputs.contains(declared) {
                return Err(Error::MissingOutput {
                    path: (*declared).to_string(),
                });
            }
        }
        for traced_output in &traced_outputs {
            if !declared_outputs.contains(traced_output)
                && !traced_output.starts_with("/proc/")
            {
                tracing::warn!(
                    path = %traced_output,
                    "undeclared output left in the sandbox"
                );
            }
        }

        // Cache outputs out of the sandbox under their real-path aliases.
        let mut outputs = Manifest::new();
        for declared in &request.outputs {
            let staged = sandbox.sandbox_path(declared)?;
            let stamp = self.cache.cache_file(&staged, Some(declared.as_str()))?;
            outputs.insert(declared.clone(), stamp.digest, stamp.size)?;
        }
        let outputs_manifest = self
            .cache
            .store_bytes(outputs.to_canonical_string().as_bytes())?;

        // Extraction bumps each stamp so the next cache_file fast-paths.
        for declared in &request.outputs {
            sandbox.extract_output(declared)?;
            self.cache.touch_stamp(declared)?;
        }

        let record = ActionRecord {
            wd: key.wd.clone(),
            env: key.env.clone(),
            prog: key.prog.clone(),
            args: key.args.clone(),
            inputs_manifest: key.inputs_manifest.clone(),
            outputs_manifest,
        };
        self.cache.publish_action(&key.id, &record)?;

        tracing::info!(
            action = %key.id,
            outputs = outputs.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "action executed and published"
        );
        Ok(Outcome::Executed {
            id: key.id.clone(),
            outputs,
        })
    }

    fn read_manifest(&self, digest: &Digest) -> Result<Manifest> {
        let bytes = self.cache.read_object(digest)?;
        let text = String::from_utf8(bytes).map_err(|_| {
            Error::Cache(artifact_cache::Error::corrupt(format!(
                "manifest object {digest} is not UTF-8"
            )))
        })?;
        Ok(Manifest::parse(&text)?)
    }
}
