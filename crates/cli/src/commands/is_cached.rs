//! The `is-cached` subcommand

use artifact_cache::{Cache, Result};
use std::path::Path;

/// Exit 0 when the file's stamp would satisfy the fast path, 1 otherwise
pub fn run(cache_dir: &Path, file: &Path) -> Result<i32> {
    let cache = Cache::open(cache_dir)?;
    if cache.is_file_cached(file) {
        Ok(0)
    } else {
        Ok(1)
    }
}
