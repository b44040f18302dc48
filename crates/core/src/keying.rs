//! Action keying
//!
//! An action is the tuple `(WD, ENV, PROG, ARGS, INPUTS)`. Each component
//! is canonicalized, stored as a blob, and digested; the action identifier
//! is the SHA-256 of the five dotted digests. The outputs manifest is the
//! cached *value* of an action and never participates in the key.
//!
//! All five component blobs and the dotted key line itself are written to
//! the object store, so a later cache hit can re-derive and verify every
//! digest bit-exactly against the stored record.

use artifact_cache::{Cache, Digest, Manifest};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One action as requested by the caller
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Working directory the program runs in
    pub working_dir: PathBuf,
    /// Environment map handed to the program
    pub environment: BTreeMap<String, String>,
    /// Path of the program binary
    pub program: PathBuf,
    /// Arguments, order preserved
    pub arguments: Vec<String>,
    /// Declared input paths (absolute; order irrelevant)
    pub inputs: Vec<String>,
    /// Declared output paths (absolute; order irrelevant)
    pub outputs: Vec<String>,
}

/// The keyed form of an action
#[derive(Debug, Clone)]
pub struct ActionKey {
    /// The action identifier
    pub id: Digest,
    /// Digest of the working-directory blob
    pub wd: Digest,
    /// Digest of the environment blob
    pub env: Digest,
    /// Content digest of the program binary
    pub prog: Digest,
    /// Digest of the arguments blob
    pub args: Digest,
    /// Digest of the inputs manifest blob
    pub inputs_manifest: Digest,
    /// The inputs manifest (declared inputs plus the program)
    pub inputs: Manifest,
    /// The program's resolved absolute path
    pub program_path: String,
}

/// Serialize an environment map as sorted `KEY=VALUE` lines
#[must_use]
pub fn serialize_environment(environment: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in environment {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Serialize an argument list, one per line, order preserved
#[must_use]
pub fn serialize_arguments(arguments: &[String]) -> String {
    let mut out = String::new();
    for argument in arguments {
        out.push_str(argument);
        out.push('\n');
    }
    out
}

/// Canonicalize and key an action, storing component blobs as a side effect
///
/// The program path is resolved to an absolute real path; its digest is
/// the content digest of the binary. The inputs manifest covers every
/// declared input plus the program.
pub fn key_action(cache: &Cache, request: &ActionRequest) -> Result<ActionKey> {
    let wd_line = format!("{}\n", request.working_dir.display());
    let wd = cache.store_bytes(wd_line.as_bytes())?;

    let env = cache.store_bytes(serialize_environment(&request.environment).as_bytes())?;
    let args = cache.store_bytes(serialize_arguments(&request.arguments).as_bytes())?;

    let program_path = std::fs::canonicalize(&request.program)
        .map_err(|_| Error::not_found(request.program.display().to_string()))?;
    let program_stamp = cache.cache_file(&program_path, None)?;
    let prog = program_stamp.digest.clone();
    let program_path = program_path.to_string_lossy().into_owned();

    let mut inputs = Manifest::new();
    for input in &request.inputs {
        let stamp = cache.cache_file(Path::new(input), None)?;
        inputs.insert(input.clone(), stamp.digest, stamp.size)?;
    }
    inputs.insert(program_path.clone(), prog.clone(), program_stamp.size)?;

    let inputs_manifest = cache.store_bytes(inputs.to_canonical_string().as_bytes())?;

    let key_line = format!("{wd}.{env}.{prog}.{args}.{inputs_manifest}\n");
    let id = cache.store_bytes(key_line.as_bytes())?;

    tracing::debug!(action = %id, program = %program_path, "keyed action");
    Ok(ActionKey {
        id,
        wd,
        env,
        prog,
        args,
        inputs_manifest,
        inputs,
        program_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        cache: Cache,
        program: PathBuf,
        input_a: PathBuf,
        input_b: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let program = tmp.path().join("tool");
        std::fs::write(&program, b"#!/bin/sh\nexit 0\n").unwrap();
        let input_a = tmp.path().join("a.txt");
        std::fs::write(&input_a, b"alpha").unwrap();
        let input_b = tmp.path().join("b.txt");
        std::fs::write(&input_b, b"beta").unwrap();

        Fixture {
            _tmp: tmp,
            cache,
            program,
            input_a,
            input_b,
        }
    }

    fn request(fix: &Fixture, inputs: Vec<String>) -> ActionRequest {
        ActionRequest {
            working_dir: PathBuf::from("/work"),
            environment: BTreeMap::from([("PATH".to_string(), "/usr/bin".to_string())]),
            program: fix.program.clone(),
            arguments: vec!["--fast".to_string(), "build".to_string()],
            inputs,
            outputs: vec!["/work/out".to_string()],
        }
    }

    #[test]
    fn test_keying_is_deterministic() {
        let fix = fixture();
        let req = request(
            &fix,
            vec![fix.input_a.to_string_lossy().into_owned()],
        );

        let first = key_action(&fix.cache, &req).unwrap();
        let second = key_action(&fix.cache, &req).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.inputs_manifest, second.inputs_manifest);
    }

    #[test]
    fn test_input_order_does_not_affect_the_id() {
        let fix = fixture();
        let a = fix.input_a.to_string_lossy().into_owned();
        let b = fix.input_b.to_string_lossy().into_owned();

        let forward = key_action(&fix.cache, &request(&fix, vec![a.clone(), b.clone()])).unwrap();
        let backward = key_action(&fix.cache, &request(&fix, vec![b, a])).unwrap();
        assert_eq!(forward.id, backward.id);
    }

    #[test]
    fn test_argument_order_does_affect_the_id() {
        let fix = fixture();
        let mut req = request(&fix, vec![]);
        let forward = key_action(&fix.cache, &req).unwrap();

        req.arguments.reverse();
        let backward = key_action(&fix.cache, &req).unwrap();
        assert_ne!(forward.id, backward.id);
    }

    #[test]
    fn test_key_changes_with_each_component() {
        let fix = fixture();
        let base_req = request(&fix, vec![fix.input_a.to_string_lossy().into_owned()]);
        let base = key_action(&fix.cache, &base_req).unwrap();

        // Working directory
        let mut req = base_req.clone();
        req.working_dir = PathBuf::from("/elsewhere");
        assert_ne!(key_action(&fix.cache, &req).unwrap().id, base.id);

        // Environment
        let mut req = base_req.clone();
        req.environment
            .insert("EXTRA".to_string(), "1".to_string());
        assert_ne!(key_action(&fix.cache, &req).unwrap().id, base.id);

        // Program contents
        std::fs::write(&fix.program, b"#!/bin/sh\nexit 1\n").unwrap();
        assert_ne!(key_action(&fix.cache, &base_req).unwrap().id, base.id);
    }

    #[test]
    fn test_input_content_change_changes_the_id() {
        let fix = fixture();
        let req = request(&fix, vec![fix.input_a.to_string_lossy().into_owned()]);
        let before = key_action(&fix.cache, &req).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&fix.input_a, b"alpha v2").unwrap();
        let after = key_action(&fix.cache, &req).unwrap();
        assert_ne!(before.id, after.id);
    }

    #[test]
    fn test_declared_outputs_do_not_affect_the_id() {
        let fix = fixture();
        let mut req = request(&fix, vec![]);
        let base = key_action(&fix.cache, &req).unwrap();

        req.outputs = vec!["/work/other-output".to_string()];
        assert_eq!(key_action(&fix.cache, &req).unwrap().id, base.id);
    }

    #[test]
    fn test_program_appears_in_inputs_manifest() {
        let fix = fixture();
        let req = request(&fix, vec![fix.input_a.to_string_lossy().into_owned()]);
        let key = key_action(&fix.cache, &req).unwrap();

        assert!(key.inputs.contains_path(&key.program_path));
        assert_eq!(key.inputs.len(), 2);
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let fix = fixture();
        let mut req = request(&fix, vec![]);
        req.program = PathBuf::from("/no/such/binary");
        assert!(matches!(
            key_action(&fix.cache, &req),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_key_line_is_stored_as_object() {
        let fix = fixture();
        let req = request(&fix, vec![]);
        let key = key_action(&fix.cache, &req).unwrap();

        let key_line = fix.cache.read_object(&key.id).unwrap();
        let expected = format!(
            "{}.{}.{}.{}.{}\n",
            key.wd, key.env, key.prog, key.args, key.inputs_manifest
        );
        assert_eq!(key_line, expected.as_bytes());
    }

    #[test]
    fn test_environment_serialization_is_sorted() {
        let env = BTreeMap::from([
            ("ZZZ".to_string(), "last".to_string()),
            ("AAA".to_string(), "first".to_string()),
        ]);
        assert_eq!(serialize_environment(&env), "AAA=first\nZZZ=last\n");
    }
}
