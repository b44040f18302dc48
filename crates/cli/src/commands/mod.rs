//! Subcommand implementations

pub mod cache_file;
pub mod execute;
pub mod is_cached;
pub mod shrink;
