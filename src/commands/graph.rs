// src/commands/graph.rs

//! Graph command - print build order or Graphviz output

use super::load_config;
use crate::cli::StoreArgs;
use anyhow::{Context, Result};
use biocook::{DependencyGraph, RecipeStore};

pub fn cmd_graph(store: &StoreArgs, dot: bool) -> Result<i32> {
    let config = load_config(store, &[])?;
    let snapshot = RecipeStore::new(&store.store)
        .scan()
        .with_context(|| format!("Failed to read recipe store {}", store.store.display()))?;
    let graph = DependencyGraph::build(&snapshot, &config.resolution)?;

    if dot {
        print!("{}", graph.to_dot());
        return Ok(0);
    }

    for (position, idx) in graph.topological_order().into_iter().enumerate() {
        let deps: Vec<String> = graph
            .build_dependencies(idx)
            .into_iter()
            .map(|d| graph.recipe(d).id.to_string())
            .collect();
        if deps.is_empty() {
            println!("{:>4}. {}", position + 1, graph.recipe(idx).id);
        } else {
            println!(
                "{:>4}. {}  <- {}",
                position + 1,
                graph.recipe(idx).id,
                deps.join(", ")
            );
        }
    }
    Ok(0)
}
