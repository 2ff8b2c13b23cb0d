// src/commands/build.rs

//! Build command - build everything missing or stale in a recipe store

use super::{load_config, EXIT_FAILURE};
use crate::cli::StoreArgs;
use anyhow::{Context, Result};
use biocook::progress::{CliProgress, LogProgress, ProgressTracker};
use biocook::{CancelToken, Orchestrator, Platform, RunOptions};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Command-line values that override the configuration file
#[derive(Debug, Default)]
pub struct BuildOverrides {
    pub jobs: Option<usize>,
    pub platforms: Vec<Platform>,
    pub force: bool,
    pub no_package: bool,
}

/// Run a build over the store
///
/// Returns the process exit status; `Err` is a run-fatal problem.
pub fn cmd_build(
    store: &StoreArgs,
    overrides: BuildOverrides,
    options: RunOptions,
    report_path: Option<PathBuf>,
    markdown: bool,
    quiet: bool,
) -> Result<i32> {
    let mut config = load_config(store, &overrides.platforms)?;
    if let Some(jobs) = overrides.jobs {
        config.jobs = jobs;
    }
    config.force |= overrides.force;
    if overrides.no_package {
        config.packaging.enabled = false;
    }

    let cancel = CancelToken::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())
            .context("Failed to install signal handler")?;
    }

    let progress: Arc<dyn ProgressTracker> = if !quiet && std::io::stderr().is_terminal() {
        Arc::new(CliProgress::new("Building"))
    } else {
        Arc::new(LogProgress::new("build"))
    };

    let orchestrator = Orchestrator::new(&store.store, config)
        .with_context(|| format!("Failed to open build state for {}", store.store.display()))?
        .with_progress(Arc::clone(&progress))
        .with_cancel(cancel.clone());

    let report = orchestrator.run(&options)?;
    if cancel.is_cancelled() {
        warn!("Run cancelled; unstarted tasks were not built");
    }

    if let Some(path) = &report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if markdown {
        print!("{}", report.to_markdown());
    } else {
        print!("{}", report.render_text());
    }

    Ok(if report.is_success() { 0 } else { EXIT_FAILURE })
}
