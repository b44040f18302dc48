//! Command-line surface
//!
//! Every flag of `execute` falls back to its `ARTIFACT_EXECUTOR_*`
//! environment variable, so wrapper scripts can configure the executor
//! without threading flags through.

use crate::tracing::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "artifact-executor")]
#[command(about = "Bazel-style action cache and sandboxed executor")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Execute an action, replaying cached outputs when possible",
        visible_alias = "exec",
        alias = "artifact-execute"
    )]
    Execute {
        #[arg(
            short = 'c',
            long = "cache",
            visible_alias = "cache-dir",
            env = "ARTIFACT_EXECUTOR_CACHE",
            value_name = "DIR",
            help = "Cache root directory"
        )]
        cache: PathBuf,

        #[arg(
            short = 'e',
            long = "env",
            visible_alias = "environment",
            alias = "environment-manifest",
            env = "ARTIFACT_EXECUTOR_ENV",
            value_name = "FILE",
            help = "File of KEY=VALUE lines"
        )]
        environment: PathBuf,

        #[arg(
            short = 'p',
            long = "program",
            visible_alias = "executable",
            env = "ARTIFACT_EXECUTOR_PROGRAM",
            value_name = "PATH",
            help = "Program to execute"
        )]
        program: PathBuf,

        #[arg(
            short = 'a',
            long = "args",
            visible_alias = "arguments-manifest",
            env = "ARTIFACT_EXECUTOR_ARGS",
            value_name = "FILE",
            help = "File with one argument per line"
        )]
        arguments: PathBuf,

        #[arg(
            short = 'i',
            long = "inputs",
            visible_alias = "inputs-manifest",
            env = "ARTIFACT_EXECUTOR_INPUTS",
            value_name = "FILE",
            help = "File with one absolute input path per line"
        )]
        inputs: PathBuf,

        #[arg(
            short = 'o',
            long = "outputs",
            visible_alias = "outputs-manifest",
            env = "ARTIFACT_EXECUTOR_OUTPUTS",
            value_name = "FILE",
            help = "File with one absolute output path per line"
        )]
        outputs: PathBuf,
    },

    #[command(about = "Ingest one file into the cache")]
    CacheFile {
        #[arg(
            short = 'c',
            long = "cache",
            visible_alias = "cache-dir",
            env = "ARTIFACT_EXECUTOR_CACHE",
            value_name = "DIR",
            help = "Cache root directory"
        )]
        cache: PathBuf,

        #[arg(
            short = 'f',
            short_alias = 'i',
            long = "file",
            visible_alias = "input",
            value_name = "PATH",
            help = "File to ingest"
        )]
        file: PathBuf,

        #[arg(
            short = 'p',
            short_alias = 'r',
            long = "path",
            visible_alias = "real-path",
            value_name = "PATH",
            help = "Index the file under this path instead of its own"
        )]
        path: Option<String>,
    },

    #[command(about = "Exit 0 if a file's cached stamp is fresh, 1 otherwise")]
    IsCached {
        #[arg(
            short = 'c',
            long = "cache",
            visible_alias = "cache-dir",
            env = "ARTIFACT_EXECUTOR_CACHE",
            value_name = "DIR",
            help = "Cache root directory"
        )]
        cache: PathBuf,

        #[arg(
            short = 'f',
            short_alias = 'i',
            long = "file",
            visible_alias = "input",
            value_name = "PATH",
            help = "File to check"
        )]
        file: PathBuf,
    },

    #[command(about = "Interactively remove cached actions and sweep unreferenced data")]
    Shrink {
        #[arg(
            short = 'c',
            long = "cache",
            visible_alias = "cache-dir",
            env = "ARTIFACT_EXECUTOR_CACHE",
            value_name = "DIR",
            help = "Cache root directory"
        )]
        cache: PathBuf,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
