//! Filesystem tracer interface
//!
//! The tracer is an external collaborator: a program that, given an output
//! file path and a command line, executes the command and emits one
//! `<kind>|<path>` event per line (`m|<dst>|<src>` for moves). The
//! executor treats it as a black box behind the [`Tracer`] trait so tests
//! can substitute a scripted implementation.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A fully prepared, sandboxed command line
#[derive(Debug, Clone)]
pub struct TracedCommand {
    /// Program path inside the sandbox
    pub program: PathBuf,
    /// Arguments, in order
    pub arguments: Vec<String>,
    /// Working directory inside the sandbox
    pub working_dir: PathBuf,
    /// Rebased environment; the parent environment is not inherited
    pub environment: BTreeMap<String, String>,
}

/// Runs a command under filesystem tracing
pub trait Tracer {
    /// Execute the command, writing events to `trace_file`, and return the
    /// raw event log
    fn run_traced(&self, command: &TracedCommand, trace_file: &Path) -> Result<String>;
}

/// Tracer backed by an external `fsatrace`-style binary
///
/// Invoked as `<tracer> rwmd <trace-file> -- <program> <args...>`.
#[derive(Debug, Clone)]
pub struct ExternalTracer {
    program: PathBuf,
}

impl ExternalTracer {
    /// Use the tracer binary at `program`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Tracer for ExternalTracer {
    fn run_traced(&self, command: &TracedCommand, trace_file: &Path) -> Result<String> {
        tracing::debug!(
            tracer = %self.program.display(),
            program = %command.program.display(),
            "spawning traced program"
        );
        let status = Command::new(&self.program)
            .arg("rwmd")
            .arg(trace_file)
            .arg("--")
            .arg(&command.program)
            .args(&command.arguments)
            .current_dir(&command.working_dir)
            .env_clear()
            .envs(&command.environment)
            .status()
            .map_err(|e| Error::tracer(format!("failed to spawn {}: {e}", self.program.display())))?;

        if !status.success() {
            return Err(Error::tracer(format!(
                "traced program failed: {status}"
            )));
        }

        std::fs::read_to_string(trace_file).map_err(|e| Error::io("read", trace_file, e))
    }
}

/// Decorator that times the traced run
///
/// Wraps any [`Tracer`] the same way tracing itself wraps the program.
/// Timing is taken around the blocking call in-process rather than by
/// interposing another wrapper binary, so the child's argv and environment
/// stay exactly what the sandbox prepared. Wall-clock duration is reported
/// through the structured log and kept readable via [`Self::last_wall_time`].
pub struct TimedTracer<T: Tracer> {
    delegate: T,
    last_wall_time: std::cell::Cell<Option<std::time::Duration>>,
}

impl<T: Tracer> TimedTracer<T> {
    /// Time every run of `delegate`
    #[must_use]
    pub fn new(delegate: T) -> Self {
        Self {
            delegate,
            last_wall_time: std::cell::Cell::new(None),
        }
    }

    /// Wall-clock duration of the most recent run, if any
    #[must_use]
    pub fn last_wall_time(&self) -> Option<std::time::Duration> {
        self.last_wall_time.get()
    }
}

impl<T: Tracer> Tracer for TimedTracer<T> {
    fn run_traced(&self, command: &TracedCommand, trace_file: &Path) -> Result<String> {
        let started = std::time::Instant::now();
        let result = self.delegate.run_traced(command, trace_file);
        let wall = started.elapsed();
        self.last_wall_time.set(Some(wall));
        match &result {
            Ok(_) => tracing::info!(
                program = %command.program.display(),
                wall_ms = wall.as_millis() as u64,
                "traced program finished"
            ),
            Err(_) => tracing::warn!(
                program = %command.program.display(),
                wall_ms = wall.as_millis() as u64,
                "traced program failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_executable(path: &Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
        let mut permissions = std::fs::metadata(path).unwrap().permissions();
        permissions.set_mode(permissions.mode() | 0o700);
        std::fs::set_permissions(path, permissions).unwrap();
    }

    #[test]
    fn test_external_tracer_invocation_contract() {
        let tmp = TempDir::new().unwrap();

        // A stand-in tracer that records its own argument convention into
        // the trace file instead of really tracing.
        let fake_tracer = tmp.path().join("fake-tracer");
        write_executable(
            &fake_tracer,
            "#!/bin/sh\nout=\"$2\"\nshift 3\necho \"r|$1\" > \"$out\"\n",
        );

        let trace_file = tmp.path().join("trace.log");
        let command = TracedCommand {
            program: PathBuf::from("/bin/true"),
            arguments: vec![],
            working_dir: tmp.path().to_path_buf(),
            environment: BTreeMap::new(),
        };

        let log = ExternalTracer::new(&fake_tracer)
            .run_traced(&command, &trace_file)
            .unwrap();
        assert_eq!(log, "r|/bin/true\n");
    }

    #[test]
    fn test_external_tracer_nonzero_exit_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let failing_tracer = tmp.path().join("failing-tracer");
        write_executable(&failing_tracer, "#!/bin/sh\nexit 3\n");

        let trace_file = tmp.path().join("trace.log");
        let command = TracedCommand {
            program: PathBuf::from("/bin/true"),
            arguments: vec![],
            working_dir: tmp.path().to_path_buf(),
            environment: BTreeMap::new(),
        };

        assert!(matches!(
            ExternalTracer::new(&failing_tracer).run_traced(&command, &trace_file),
            Err(Error::TracerFailure { .. })
        ));
    }

    #[test]
    fn test_timed_tracer_passes_through_and_measures() {
        struct SleepyTracer;
        impl Tracer for SleepyTracer {
            fn run_traced(&self, _: &TracedCommand, _: &Path) -> Result<String> {
                std::thread::sleep(std::time::Duration::from_millis(10));
                Ok("w|/t/out\n".to_string())
            }
        }

        let timed = TimedTracer::new(SleepyTracer);
        assert!(timed.last_wall_time().is_none());

        let command = TracedCommand {
            program: PathBuf::from("/bin/true"),
            arguments: vec![],
            working_dir: PathBuf::from("/"),
            environment: BTreeMap::new(),
        };
        let log = timed.run_traced(&command, Path::new("/unused")).unwrap();
        assert_eq!(log, "w|/t/out\n");
        assert!(timed.last_wall_time().unwrap() >= std::time::Duration::from_millis(10));
    }

    #[test]
    fn test_timed_tracer_reports_delegate_errors() {
        struct BrokenTracer;
        impl Tracer for BrokenTracer {
            fn run_traced(&self, _: &TracedCommand, _: &Path) -> Result<String> {
                Err(Error::tracer("scripted failure"))
            }
        }

        let timed = TimedTracer::new(BrokenTracer);
        let command = TracedCommand {
            program: PathBuf::from("/bin/true"),
            arguments: vec![],
            working_dir: PathBuf::from("/"),
            environment: BTreeMap::new(),
        };
        assert!(matches!(
            timed.run_traced(&command, Path::new("/unused")),
            Err(Error::TracerFailure { .. })
        ));
        assert!(timed.last_wall_time().is_some());
    }

    #[test]
    fn test_missing_tracer_binary_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let command = TracedCommand {
            program: PathBuf::from("/bin/true"),
            arguments: vec![],
            working_dir: tmp.path().to_path_buf(),
            environment: BTreeMap::new(),
        };
        assert!(matches!(
            ExternalTracer::new("/no/such/tracer").run_traced(&command, &tmp.path().join("t")),
            Err(Error::TracerFailure { .. })
        ));
    }
}
