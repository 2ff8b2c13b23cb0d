// src/recipe/mod.rs

//! Recipes: declarative descriptions of how to build one versioned package
//!
//! A recipe store is a directory tree with one subdirectory per recipe. Each
//! recipe directory holds a `recipe.toml` and, usually, a `build.sh`.
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "samtools"
//! version = "1.9"
//!
//! [build]
//! number = 2
//! platforms = ["linux-64", "osx-64"]
//!
//! [requirements]
//! build = ["make", "gcc >=9"]
//! host = ["htslib 1.9.*", "zlib"]
//! run = ["htslib >=1.9,<2"]
//!
//! [test]
//! commands = ["samtools --version"]
//!
//! [about]
//! home = "https://www.htslib.org"
//! license = "MIT"
//! summary = "Tools for manipulating next-generation sequencing data"
//! ```
//!
//! The store is read once per run into an immutable [`RecipeSnapshot`]; the
//! rest of the pipeline only ever sees that snapshot.

mod bump;
mod format;
pub mod kitchen;
pub mod parser;
mod store;

pub use bump::bump_build_number;
pub use format::{
    About, BuildScript, DEFAULT_SCRIPT_FILE, Dependency, DependencyKind, Platform, RECIPE_FILE,
    Recipe, RecipeFile, RecipeId,
};
pub use parser::{parse_recipe, parse_recipe_file};
pub use store::{RecipeSnapshot, RecipeStore, recipe_checksum};
