// src/commands/mod.rs
//! Command handlers for the biocook CLI

mod build;
mod bump;
mod graph;
mod lint;
mod status;

pub use build::{cmd_build, BuildOverrides};
pub use bump::cmd_bump;
pub use graph::cmd_graph;
pub use lint::cmd_lint;
pub use status::cmd_status;

use crate::cli::StoreArgs;
use anyhow::{Context, Result};
use biocook::{BiocookConfig, Platform};

/// Exit status for a run that completed but did not succeed
pub const EXIT_FAILURE: i32 = 1;

/// Configuration for a store, with command-line platforms applied
fn load_config(store: &StoreArgs, platforms: &[Platform]) -> Result<BiocookConfig> {
    let mut config = BiocookConfig::discover(store.config.as_deref(), &store.store)
        .with_context(|| format!("Failed to load configuration for {}", store.store.display()))?;
    if !platforms.is_empty() {
        config.platforms = platforms.to_vec();
    }
    Ok(config)
}
