// src/main.rs

mod cli;
mod commands;

use biocook::RunOptions;
use clap::Parser;
use cli::{Cli, Commands};
use commands::BuildOverrides;
use tracing_subscriber::EnvFilter;

/// Exit status for run-fatal errors: cycles, bad configuration, unreadable store
const EXIT_FATAL: i32 = 2;

fn main() {
    let cli = Cli::parse();

    let default_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Build {
            store,
            jobs,
            platforms,
            dry_run,
            force,
            only,
            report,
            no_package,
            markdown,
        } => commands::cmd_build(
            &store,
            BuildOverrides {
                jobs,
                platforms,
                force,
                no_package,
            },
            RunOptions {
                selection: only,
                dry_run,
            },
            report,
            markdown,
            cli.quiet,
        ),
        Commands::Lint {
            store,
            only,
            markdown,
        } => commands::cmd_lint(&store, &only, markdown),
        Commands::Graph { store, dot } => commands::cmd_graph(&store, dot),
        Commands::Status {
            store,
            platforms,
            only,
        } => commands::cmd_status(&store, &platforms, &only),
        Commands::Bump { store, names } => commands::cmd_bump(&store, &names),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}
