//! The `cache-file` subcommand

use artifact_cache::{Cache, Result};
use std::path::Path;

/// Ingest one file, printing its recorded `hash|size` stamp
pub fn run(cache_dir: &Path, file: &Path, alias: Option<&str>) -> Result<i32> {
    let cache = Cache::open(cache_dir)?;
    let stamp = cache.cache_file(file, alias)?;
    println!("{}|{}", stamp.digest, stamp.size);
    Ok(0)
}
