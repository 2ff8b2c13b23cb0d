// src/classify.rs

//! Build-state classification
//!
//! Expands the recipe graph into one task per (recipe, platform) and decides
//! for each whether it must be built. The decision reads the artifact store
//! and the package resolver but never builds anything:
//!
//! - **up-to-date**: the stored artifact was built from the current recipe checksum
//! - **stale**: an artifact exists but was built from different recipe content
//! - **missing**: nothing stored under the task's key
//! - **unbuildable**: a build-time dependency can never be satisfied; this
//!   propagates to every transitive dependent with the original cause

use crate::artifact::{ArtifactKey, ArtifactStore};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::recipe::{Platform, Recipe};
use crate::resolver::PackageResolver;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Classification of one build task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum BuildState {
    UpToDate,
    Stale,
    Missing,
    Unbuildable {
        /// Name of the dependency that cannot be satisfied
        root_cause: String,
    },
}

impl BuildState {
    /// Whether the task has to go through the build runner
    pub fn needs_build(&self) -> bool {
        matches!(self, BuildState::Stale | BuildState::Missing)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::UpToDate => write!(f, "up-to-date"),
            BuildState::Stale => write!(f, "stale"),
            BuildState::Missing => write!(f, "missing"),
            BuildState::Unbuildable { root_cause } => write!(f, "unbuildable ({})", root_cause),
        }
    }
}

/// One (recipe, platform) unit before scheduling
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub recipe: Arc<Recipe>,
    /// Node index in the dependency graph
    pub recipe_idx: usize,
    pub platform: Platform,
    pub key: ArtifactKey,
    /// Build-time dependency tasks, as indices into [`BuildPlan::tasks`]
    pub deps: Vec<usize>,
    pub state: BuildState,
}

impl PlannedTask {
    /// Human-readable task label, e.g. `samtools-1.9-0 [linux-64]`
    pub fn label(&self) -> String {
        format!("{} [{}]", self.recipe.id, self.platform)
    }
}

/// Options controlling classification
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    /// Target platforms requested for the run
    pub platforms: BTreeSet<Platform>,
    /// Restrict to these graph nodes (already closed over build deps)
    pub selection: Option<BTreeSet<usize>>,
    /// Rebuild even when the stored artifact is current
    pub force: bool,
}

/// Every task of a run, in dependency order
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub tasks: Vec<PlannedTask>,
}

impl BuildPlan {
    /// Classify every (recipe, platform) pair of the graph
    pub fn classify(
        graph: &DependencyGraph,
        store: &dyn ArtifactStore,
        resolver: &dyn PackageResolver,
        options: &ClassifyOptions,
    ) -> Result<Self> {
        let mut tasks: Vec<PlannedTask> = Vec::new();
        let mut index: HashMap<(usize, Platform), usize> = HashMap::new();

        for recipe_idx in graph.topological_order() {
            if let Some(selection) = &options.selection
                && !selection.contains(&recipe_idx)
            {
                continue;
            }
            let recipe = graph.recipe(recipe_idx);

            for platform in recipe.target_platforms(&options.platforms) {
                let mut deps = Vec::new();
                let mut unbuildable: Option<String> = None;

                for dep in graph.external_build_dependencies(recipe_idx) {
                    if unbuildable.is_none() && !resolver.is_satisfiable(dep, platform) {
                        unbuildable = Some(dep.name.clone());
                    }
                }

                for dep_idx in graph.build_dependencies(recipe_idx) {
                    let dep_recipe = graph.recipe(dep_idx);
                    let dep_task = dependency_platform(dep_recipe, platform, &options.platforms)
                        .and_then(|p| index.get(&(dep_idx, p)).copied());

                    match dep_task {
                        Some(t) => {
                            if unbuildable.is_none()
                                && let BuildState::Unbuildable { root_cause } = &tasks[t].state
                            {
                                unbuildable = Some(root_cause.clone());
                            }
                            deps.push(t);
                        }
                        None => {
                            if unbuildable.is_none() {
                                unbuildable = Some(format!(
                                    "{} (not available for {})",
                                    dep_recipe.name(),
                                    platform
                                ));
                            }
                        }
                    }
                }

                let key = ArtifactKey::new(&recipe.id, platform);
                let state = match unbuildable {
                    Some(root_cause) => BuildState::Unbuildable { root_cause },
                    None => match store.hash(&key)? {
                        None => BuildState::Missing,
                        Some(_) if options.force => BuildState::Stale,
                        Some(stored) if stored == recipe.checksum => BuildState::UpToDate,
                        Some(_) => BuildState::Stale,
                    },
                };
                debug!("{} [{}]: {}", recipe.id, platform, state);

                index.insert((recipe_idx, platform), tasks.len());
                tasks.push(PlannedTask {
                    recipe: Arc::clone(recipe),
                    recipe_idx,
                    platform,
                    key,
                    deps,
                    state,
                });
            }
        }

        let plan = Self { tasks };
        info!(
            "Classified {} tasks: {} to build, {} up-to-date, {} unbuildable",
            plan.tasks.len(),
            plan.count(|s| s.needs_build()),
            plan.count(|s| *s == BuildState::UpToDate),
            plan.count(|s| matches!(s, BuildState::Unbuildable { .. })),
        );
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks whose state matches `pred`
    pub fn count(&self, pred: impl Fn(&BuildState) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.state)).count()
    }
}

/// Platform of the dependency task a task on `platform` waits for
///
/// Noarch dependencies always come from the noarch task. A noarch task with a
/// platform-specific dependency uses the first requested platform the
/// dependency supports.
fn dependency_platform(
    dep: &Recipe,
    platform: Platform,
    requested: &BTreeSet<Platform>,
) -> Option<Platform> {
    if dep.noarch {
        return Some(Platform::Noarch);
    }
    if platform == Platform::Noarch {
        return dep.target_platforms(requested).into_iter().next();
    }
    dep.platforms.contains(&platform).then_some(platform)
}
