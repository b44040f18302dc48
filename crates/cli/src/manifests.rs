//! Manifest file loaders
//!
//! The CLI's manifests are small line-oriented files: `KEY=VALUE` lines
//! for the environment, one argument per line (order preserved), and one
//! absolute path per line for inputs and outputs.

use artifact_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Load a `KEY=VALUE`-per-line environment manifest
pub fn load_environment(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
    let mut environment = BTreeMap::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::config(format!(
                "environment manifest {} has a line without '=': {line}",
                path.display()
            ))
        })?;
        environment.insert(key.to_string(), value.to_string());
    }
    Ok(environment)
}

/// Load a one-argument-per-line manifest, preserving order
pub fn load_arguments(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Load a one-absolute-path-per-line manifest
pub fn load_paths(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
    let mut paths = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('/') {
            return Err(Error::config(format!(
                "path manifest {} has a non-absolute entry: {line}",
                path.display()
            )));
        }
        paths.push(line.to_string());
    }
    Ok(paths)
}
