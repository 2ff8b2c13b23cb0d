// src/recipe/store.rs

//! Recipe store reader
//!
//! Scans a directory tree for recipe directories (any directory holding a
//! `recipe.toml`) and produces an immutable [`RecipeSnapshot`]. Parsing and
//! checksumming run in parallel; problems with individual recipes are
//! collected on the snapshot instead of aborting the scan.

use crate::error::{Error, Result};
use crate::hash::{Digest, Hasher};
use crate::recipe::format::{RECIPE_FILE, Recipe, RecipeId};
use crate::recipe::parser::{into_recipe, parse_recipe_file};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Immutable view of every recipe found in one scan
#[derive(Debug, Default)]
pub struct RecipeSnapshot {
    root: PathBuf,
    recipes: Vec<Arc<Recipe>>,
    /// Position of each identity in `recipes`
    index: HashMap<RecipeId, usize>,
    problems: Vec<Error>,
}

impl RecipeSnapshot {
    /// Build a snapshot from records already in memory
    ///
    /// Duplicates are resolved the same way a scan resolves them: the first
    /// record in `rel_path` order wins.
    pub fn from_recipes(root: impl Into<PathBuf>, recipes: Vec<Recipe>) -> Self {
        let mut snapshot = Self {
            root: root.into(),
            ..Default::default()
        };
        let mut recipes = recipes;
        recipes.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        for recipe in recipes {
            snapshot.insert(recipe);
        }
        snapshot.sort();
        snapshot
    }

    fn insert(&mut self, recipe: Recipe) {
        if let Some(&pos) = self.index.get(&recipe.id) {
            let first = &self.recipes[pos];
            warn!(
                "Duplicate recipe {} at {} (keeping {})",
                recipe.id,
                recipe.rel_path.display(),
                first.rel_path.display()
            );
            self.problems.push(Error::DuplicateRecipe {
                identity: recipe.id.to_string(),
                path: recipe.rel_path,
                first: first.rel_path.clone(),
            });
            return;
        }
        self.index.insert(recipe.id.clone(), self.recipes.len());
        self.recipes.push(Arc::new(recipe));
    }

    /// Order recipes by identity and reindex
    fn sort(&mut self) {
        self.recipes.sort_by(|a, b| a.id.cmp(&b.id));
        self.index = self
            .recipes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }

    /// Root directory the snapshot was read from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All valid recipes, ordered by identity
    pub fn recipes(&self) -> &[Arc<Recipe>] {
        &self.recipes
    }

    /// Malformed and duplicate recipes found during the scan
    pub fn problems(&self) -> &[Error] {
        &self.problems
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn get(&self, id: &RecipeId) -> Option<&Arc<Recipe>> {
        self.index.get(id).map(|&i| &self.recipes[i])
    }

    /// Every version of a package present in the store
    pub fn by_name(&self, name: &str) -> Vec<&Arc<Recipe>> {
        self.recipes.iter().filter(|r| r.name() == name).collect()
    }

    /// Group recipes by package name
    pub fn name_index(&self) -> HashMap<&str, Vec<usize>> {
        let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, recipe) in self.recipes.iter().enumerate() {
            index.entry(recipe.name()).or_default().push(i);
        }
        index
    }
}

/// Reads recipe directories beneath a root path
pub struct RecipeStore {
    root: PathBuf,
}

impl RecipeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scan the tree and produce a snapshot
    ///
    /// Fails only when the root itself cannot be read. Individual recipes that
    /// fail to parse are recorded as [`Error::MalformedRecipe`].
    pub fn scan(&self) -> Result<RecipeSnapshot> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(format!(
                "Recipe store {} is not a directory",
                self.root.display()
            )));
        }

        let dirs = self.find_recipe_dirs()?;
        info!("Found {} recipe directories in {}", dirs.len(), self.root.display());

        let loaded: Vec<(PathBuf, Result<Recipe>)> = dirs
            .par_iter()
            .map(|dir| (dir.clone(), self.load(dir)))
            .collect();

        let mut snapshot = RecipeSnapshot {
            root: self.root.clone(),
            ..Default::default()
        };
        for (dir, result) in loaded {
            let rel_path = self.relative(&dir);
            match result {
                Ok(recipe) => {
                    debug!("Loaded {} from {}", recipe.id, rel_path.display());
                    snapshot.insert(recipe);
                }
                Err(e) => {
                    warn!("Malformed recipe at {}: {}", rel_path.display(), e);
                    snapshot.problems.push(Error::MalformedRecipe {
                        path: rel_path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        snapshot.sort();

        Ok(snapshot)
    }

    /// Load a single recipe directory
    pub fn load(&self, dir: &Path) -> Result<Recipe> {
        let file = parse_recipe_file(&dir.join(RECIPE_FILE))?;
        let checksum = recipe_checksum(dir)?;
        into_recipe(file, dir, self.relative(dir), checksum)
    }

    fn relative(&self, dir: &Path) -> PathBuf {
        dir.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| dir.to_path_buf())
    }

    /// Directories containing a recipe file, sorted by path
    fn find_recipe_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = entry.map_err(|e| {
                Error::IoError(format!("Failed to walk {}: {}", self.root.display(), e))
            })?;
            if entry.file_type().is_file()
                && entry.file_name() == RECIPE_FILE
                && let Some(parent) = entry.path().parent()
            {
                dirs.push(parent.to_path_buf());
            }
        }

        dirs.sort();
        Ok(dirs)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Content checksum of a recipe directory
///
/// Covers every file's relative path and bytes in sorted order. Nested recipe
/// directories belong to their own recipe and are excluded.
pub fn recipe_checksum(dir: &Path) -> Result<Digest> {
    let mut hasher = Hasher::new();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !(e.file_type().is_dir() && e.path().join(RECIPE_FILE).is_file())
        });

    for entry in walker {
        let entry = entry
            .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", dir.display(), e)))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        hasher.update_field(rel.as_bytes());

        if entry.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            hasher.update_field(b"symlink");
            hasher.update_field(target.to_string_lossy().as_bytes());
        } else {
            let bytes = std::fs::read(entry.path()).map_err(|e| {
                Error::IoError(format!("Failed to read {}: {}", entry.path().display(), e))
            })?;
            hasher.update_field(b"file");
            hasher.update_field(&bytes);
        }
    }

    Ok(hasher.finalize())
}
