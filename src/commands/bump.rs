// src/commands/bump.rs

//! Bump command - increment recipe build numbers

use crate::cli::StoreArgs;
use anyhow::{bail, Context, Result};
use biocook::recipe::bump_build_number;
use biocook::RecipeStore;

pub fn cmd_bump(store: &StoreArgs, names: &[String]) -> Result<i32> {
    let snapshot = RecipeStore::new(&store.store)
        .scan()
        .with_context(|| format!("Failed to read recipe store {}", store.store.display()))?;

    for name in names {
        let matches = snapshot.by_name(name);
        if matches.is_empty() {
            bail!("No recipe named '{}' in {}", name, store.store.display());
        }
        for recipe in matches {
            let (old, new) = bump_build_number(&recipe.dir)
                .with_context(|| format!("Failed to bump {}", recipe.id))?;
            println!("{} {}: build {} -> {}", name, recipe.id.version, old, new);
        }
    }
    Ok(0)
}
