// src/commands/status.rs

//! Status command - classify tasks against the artifact store

use super::load_config;
use crate::cli::StoreArgs;
use anyhow::{Context, Result};
use biocook::{BuildState, Orchestrator, Platform, RunOptions};

pub fn cmd_status(store: &StoreArgs, platforms: &[Platform], only: &[String]) -> Result<i32> {
    let config = load_config(store, platforms)?;
    let orchestrator = Orchestrator::new(&store.store, config)
        .with_context(|| format!("Failed to open build state for {}", store.store.display()))?;

    let prepared = orchestrator.prepare(&RunOptions {
        selection: only.to_vec(),
        dry_run: true,
    })?;
    let excluded = prepared.lint_excluded();

    for task in &prepared.plan.tasks {
        match excluded.get(&task.recipe.id) {
            Some(rules) => println!("{:<50} lint-excluded ({})", task.label(), rules.join(", ")),
            None => println!("{:<50} {}", task.label(), task.state),
        }
    }

    let plan = &prepared.plan;
    println!(
        "\n{} tasks: {} to build, {} up-to-date, {} unbuildable",
        plan.len(),
        plan.count(BuildState::needs_build),
        plan.count(|s| *s == BuildState::UpToDate),
        plan.count(|s| matches!(s, BuildState::Unbuildable { .. })),
    );
    for problem in prepared.snapshot.problems() {
        println!("{}", problem);
    }
    Ok(0)
}
