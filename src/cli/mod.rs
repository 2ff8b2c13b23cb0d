// src/cli/mod.rs
//! CLI definitions for biocook
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `build` - Build everything that is missing or stale
//! - `lint` - Check recipes without building
//! - `graph` - Show build order or Graphviz output
//! - `status` - Classify tasks against the artifact store
//! - `bump` - Increment recipe build numbers

use biocook::Platform;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "biocook")]
#[command(author = "Biocook Contributors")]
#[command(version)]
#[command(about = "Recipe build orchestrator", long_about = None)]
pub struct Cli {
    /// More log output (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by commands that read a recipe store
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Recipe store root
    pub store: PathBuf,

    /// Configuration file (default: biocook.toml in the store root)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every recipe that is missing or stale
    Build {
        #[command(flatten)]
        store: StoreArgs,

        /// Maximum simultaneous build jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Target platform (repeatable; default: the host platform)
        #[arg(short, long = "platform")]
        platforms: Vec<Platform>,

        /// Show what would be built without building
        #[arg(long)]
        dry_run: bool,

        /// Rebuild up-to-date recipes too
        #[arg(long)]
        force: bool,

        /// Only these recipes and their build dependencies
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Write a JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Skip image staging and upload
        #[arg(long)]
        no_package: bool,

        /// Print a markdown summary instead of plain text
        #[arg(long)]
        markdown: bool,
    },

    /// Lint recipes without building
    Lint {
        #[command(flatten)]
        store: StoreArgs,

        /// Only these recipes
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Print the report as markdown
        #[arg(long)]
        markdown: bool,
    },

    /// Show the build order of the recipe store
    Graph {
        #[command(flatten)]
        store: StoreArgs,

        /// Print Graphviz dot instead of the build order
        #[arg(long)]
        dot: bool,
    },

    /// Classify every task against the artifact store
    Status {
        #[command(flatten)]
        store: StoreArgs,

        /// Target platform (repeatable; default: the host platform)
        #[arg(short, long = "platform")]
        platforms: Vec<Platform>,

        /// Only these recipes and their build dependencies
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },

    /// Increment the build number of the named recipes
    Bump {
        #[command(flatten)]
        store: StoreArgs,

        /// Recipe names
        #[arg(required = true)]
        names: Vec<String>,
    },
}
