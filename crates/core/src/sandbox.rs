//! Sandbox manager
//!
//! A sandbox is a fresh temporary directory `S` into which every declared
//! input (and the program) is mirrored at `S/<absolute-path>`, and whose
//! environment values are rebased so that absolute path segments point
//! inside `S`. The sandbox is a hermeticity check based on path rebasing,
//! not a kernel namespace jail: a program that hard-codes an absolute path
//! escapes it, and the trace reconciliation catches exactly that.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Pluggable environment-rebasing rule
///
/// Any replacement must accept `(sandbox_root, input_env)` and produce the
/// rebased map; [`rebase_paths_in_environment`] is the default.
pub type EnvRebase = fn(&Path, &BTreeMap<String, String>) -> BTreeMap<String, String>;

/// A per-action sandbox directory
///
/// The directory is removed when the sandbox is dropped.
#[derive(Debug)]
pub struct Sandbox {
    dir: tempfile::TempDir,
    root_str: String,
}

impl Sandbox {
    /// Create a fresh sandbox under `parent`
    pub fn create(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("action-")
            .tempdir_in(parent)
            .map_err(|e| Error::io("tempdir", parent, e))?;
        let root_str = dir.path().to_string_lossy().into_owned();
        Ok(Self { dir, root_str })
    }

    /// The sandbox root `S`
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Map an absolute path to its location inside the sandbox
    pub fn sandbox_path(&self, absolute: &str) -> Result<PathBuf> {
        let relative = absolute.strip_prefix('/').ok_or_else(|| {
            Error::config(format!("sandboxed paths must be absolute: {absolute}"))
        })?;
        Ok(self.root().join(relative))
    }

    /// Whether a traced path lies inside the sandbox
    #[must_use]
    pub fn contains(&self, traced: &str) -> bool {
        traced == self.root_str
            || traced
                .strip_prefix(&self.root_str)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Strip the sandbox prefix, returning the original absolute path
    #[must_use]
    pub fn strip_prefix<'a>(&self, traced: &'a str) -> Option<&'a str> {
        traced
            .strip_prefix(&self.root_str)
            .filter(|rest| rest.starts_with('/'))
    }

    /// Copy a real file to its mirrored location inside the sandbox
    ///
    /// Parents are created on demand and the copy is made owner-writable.
    pub fn stage_file(&self, absolute: &str) -> Result<()> {
        let source = Path::new(absolute);
        if !source.exists() {
            return Err(Error::not_found(absolute));
        }
        let destination = self.sandbox_path(absolute)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
        }
        fs::copy(source, &destination).map_err(|e| Error::io("copy", &destination, e))?;
        make_owner_writable(&destination)?;
        Ok(())
    }

    /// Mirror the working directory as `S/<wd>`
    pub fn mirror_working_dir(&self, working_dir: &Path) -> Result<()> {
        let mirrored = self.sandbox_path(&working_dir.to_string_lossy())?;
        fs::create_dir_all(&mirrored).map_err(|e| Error::io("create_dir_all", &mirrored, e))?;
        Ok(())
    }

    /// Copy a produced output back out to its declared absolute path
    pub fn extract_output(&self, absolute: &str) -> Result<()> {
        let source = self.sandbox_path(absolute)?;
        if !source.exists() {
            return Err(Error::not_found(source.to_string_lossy()));
        }
        let destination = Path::new(absolute);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
        }
        fs::copy(&source, destination).map_err(|e| Error::io("copy", destination, e))?;
        Ok(())
    }

    /// Verify that out-of-sandbox accesses were harmless
    ///
    /// Every traced path that does not start with `S` is non-hermetic.
    /// `/proc/*` paths are excluded from analysis. A non-hermetic path
    /// whose real contents equal its sandboxed mirror is logged as a
    /// warning; different or missing mirrored contents are fatal.
    pub fn check_hermetic_files<'a>(
        &self,
        traced: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        for path in traced {
            if self.contains(path) || path.starts_with("/proc/") {
                continue;
            }

            let real = fs::read(path).map_err(|_| Error::not_found(path))?;
            let mirrored = self.sandbox_path(path)?;
            let staged = match fs::read(&mirrored) {
                Ok(staged) => staged,
                Err(_) => {
                    return Err(Error::NonHermeticDivergent {
                        path: path.to_string(),
                    });
                }
            };
            if real == staged {
                tracing::warn!(
                    path = %path,
                    "non-hermetic access with identical contents"
                );
            } else {
                return Err(Error::NonHermeticDivergent {
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Default environment-rebasing rule
///
/// A value beginning with `/`, or any `:`-delimited segment beginning with
/// `/`, is prefixed with the sandbox root; everything else passes through
/// unchanged.
#[must_use]
pub fn rebase_paths_in_environment(
    sandbox_root: &Path,
    environment: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let root = sandbox_root.to_string_lossy();
    environment
        .iter()
        .map(|(key, value)| {
            let rebased = value
                .split(':')
                .map(|segment| {
                    if segment.starts_with('/') {
                        format!("{root}{segment}")
                    } else {
                        segment.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(":");
            (key.clone(), rebased)
        })
        .collect()
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rebase_rules() {
        let root = Path::new("/sbx");
        let rebased = rebase_paths_in_environment(
            root,
            &env_of(&[
                ("HOME", "/home/user"),
                ("PATH", "/usr/bin:/bin:relative"),
                ("LANG", "en_US.UTF-8"),
                ("MIXED", "front:/abs/path"),
            ]),
        );

        assert_eq!(rebased["HOME"], "/sbx/home/user");
        assert_eq!(rebased["PATH"], "/sbx/usr/bin:/sbx/bin:relative");
        assert_eq!(rebased["LANG"], "en_US.UTF-8");
        assert_eq!(rebased["MIXED"], "front:/sbx/abs/path");
    }

    #[test]
    fn test_stage_and_extract_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();

        let real = tmp.path().join("data.txt");
        std::fs::write(&real, b"payload").unwrap();
        let real_str = real.to_string_lossy().into_owned();

        sandbox.stage_file(&real_str).unwrap();
        let staged = sandbox.sandbox_path(&real_str).unwrap();
        assert_eq!(std::fs::read(&staged).unwrap(), b"payload");

        // Produce a new file inside the sandbox and extract it.
        let out = tmp.path().join("nested/dir/out.txt");
        let out_str = out.to_string_lossy().into_owned();
        let staged_out = sandbox.sandbox_path(&out_str).unwrap();
        std::fs::create_dir_all(staged_out.parent().unwrap()).unwrap();
        std::fs::write(&staged_out, b"result").unwrap();
        sandbox.extract_output(&out_str).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"result");
    }

    #[test]
    fn test_extract_missing_output_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();
        assert!(matches!(
            sandbox.extract_output("/never/written"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_mirror_working_dir() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();

        sandbox.mirror_working_dir(Path::new("/work/project")).unwrap();
        assert!(sandbox.sandbox_path("/work/project").unwrap().is_dir());
    }

    #[test]
    fn test_contains_and_strip_prefix() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();
        let root = sandbox.root().to_string_lossy().into_owned();

        let inside = format!("{root}/etc/hosts");
        assert!(sandbox.contains(&inside));
        assert_eq!(sandbox.strip_prefix(&inside), Some("/etc/hosts"));

        assert!(!sandbox.contains("/etc/hosts"));
        assert_eq!(sandbox.strip_prefix("/etc/hosts"), None);

        // A sibling sharing the root as a string prefix is outside.
        let sibling = format!("{root}-other/file");
        assert!(!sandbox.contains(&sibling));
    }

    #[test]
    fn test_hermetic_check_ignores_proc_and_sandbox_paths() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();
        let inside = format!("{}/staged", sandbox.root().display());

        sandbox
            .check_hermetic_files([inside.as_str(), "/proc/self/maps"])
            .unwrap();
    }

    #[test]
    fn test_hermetic_check_warns_on_identical_contents() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();

        let real = tmp.path().join("config");
        std::fs::write(&real, b"same bytes").unwrap();
        let real_str = real.to_string_lossy().into_owned();
        sandbox.stage_file(&real_str).unwrap();

        // Identical contents: a warning, not an error.
        sandbox.check_hermetic_files([real_str.as_str()]).unwrap();
    }

    #[test]
    fn test_hermetic_check_rejects_divergent_contents() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();

        let real = tmp.path().join("config");
        std::fs::write(&real, b"original").unwrap();
        let real_str = real.to_string_lossy().into_owned();
        sandbox.stage_file(&real_str).unwrap();
        std::fs::write(&real, b"changed behind the sandbox").unwrap();

        assert!(matches!(
            sandbox.check_hermetic_files([real_str.as_str()]),
            Err(Error::NonHermeticDivergent { .. })
        ));
    }

    #[test]
    fn test_hermetic_check_rejects_unstaged_path() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::create(tmp.path()).unwrap();

        let real = tmp.path().join("never-staged");
        std::fs::write(&real, b"data").unwrap();
        let real_str = real.to_string_lossy().into_owned();

        assert!(matches!(
            sandbox.check_hermetic_files([real_str.as_str()]),
            Err(Error::NonHermeticDivergent { .. })
        ));
    }
}
