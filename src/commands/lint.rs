// src/commands/lint.rs

//! Lint command - check recipes without building

use super::{load_config, EXIT_FAILURE};
use crate::cli::StoreArgs;
use anyhow::{Context, Result};
use biocook::lint::Severity;
use biocook::RecipeStore;
use std::sync::Arc;

pub fn cmd_lint(store: &StoreArgs, only: &[String], markdown: bool) -> Result<i32> {
    let config = load_config(store, &[])?;
    let snapshot = RecipeStore::new(&store.store)
        .scan()
        .with_context(|| format!("Failed to read recipe store {}", store.store.display()))?;

    let recipes: Vec<_> = snapshot
        .recipes()
        .iter()
        .filter(|r| only.is_empty() || only.iter().any(|n| n == r.name()))
        .map(Arc::clone)
        .collect();
    let report = config.linter().lint_all(&recipes);

    if markdown {
        print!("{}", report.to_markdown());
    } else {
        for recipe in &report.recipes {
            for finding in &recipe.findings {
                let level = match finding.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                };
                println!(
                    "{}: {} [{}] {}",
                    recipe.path.display(),
                    level,
                    finding.rule,
                    finding.message
                );
            }
        }
        println!(
            "{} recipes, {} error(s), {} warning(s)",
            report.recipes.len(),
            report.error_count(),
            report.warning_count()
        );
    }

    for problem in snapshot.problems() {
        println!("{}", problem);
    }

    let failed = report.error_count() > 0 || !snapshot.problems().is_empty();
    Ok(if failed { EXIT_FAILURE } else { 0 })
}
