//! The `shrink` subcommand

use artifact_cache::{Cache, Result, TtyPrompt, shrink};
use std::path::Path;

/// Walk cached actions interactively, then sweep unreferenced data
pub fn run(cache_dir: &Path) -> Result<i32> {
    let cache = Cache::open(cache_dir)?;
    let mut prompt = TtyPrompt::open()?;
    let report = shrink(&cache, &mut prompt)?;
    println!(
        "removed {} actions, {} objects, {} stamps ({} bytes freed)",
        report.actions_removed, report.objects_removed, report.stamps_removed, report.bytes_freed
    );
    Ok(0)
}
