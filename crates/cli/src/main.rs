//! artifact-executor CLI
//!
//! Parses arguments, loads the line-oriented manifests, and dispatches to
//! the cache and executor crates. Fatal errors from any component
//! terminate the run with exit code 1; `is-cached` signals a cold cache
//! with exit code 1 and no error.

mod cli;
mod commands;
mod manifests;
mod tracing;

use crate::cli::{Commands, parse};

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    let cli = parse();
    if let Err(err) = tracing::init_tracing(cli.level.clone().into()) {
        eprintln!("{err:?}");
        std::process::exit(EXIT_ERROR);
    }

    std::process::exit(run(cli.command));
}

fn run(command: Commands) -> i32 {
    let result = match command {
        Commands::Execute {
            cache,
            environment,
            program,
            arguments,
            inputs,
            outputs,
        } => commands::execute::run(&commands::execute::ExecuteArgs {
            cache,
            environment,
            program,
            arguments,
            inputs,
            outputs,
        })
        .map_err(miette::Report::new),
        Commands::CacheFile { cache, file, path } => {
            commands::cache_file::run(&cache, &file, path.as_deref()).map_err(miette::Report::new)
        }
        Commands::IsCached { cache, file } => {
            commands::is_cached::run(&cache, &file).map_err(miette::Report::new)
        }
        Commands::Shrink { cache } => {
            commands::shrink::run(&cache).map_err(miette::Report::new)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:?}");
            EXIT_ERROR
        }
    }
}
