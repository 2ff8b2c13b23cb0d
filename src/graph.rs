// src/graph.rs

//! Recipe dependency graph
//!
//! Built in two phases: first a name index over the whole snapshot, then every
//! declared dependency is resolved against that index. Resolution therefore
//! never depends on the order recipes were read.
//!
//! A dependency that matches an in-store recipe becomes an edge to that recipe;
//! anything else is marked external and left to the package resolver. Only
//! build-time edges constrain build order, so only they are checked for
//! cycles.
//!
//! # Example
//!
//! ```ignore
//! let snapshot = RecipeStore::new("recipes").scan()?;
//! let graph = DependencyGraph::build(&snapshot, &ResolutionPolicy::default())?;
//! for idx in graph.topological_order() {
//!     println!("{}", graph.recipe(idx).id);
//! }
//! ```

use crate::error::{Error, Result};
use crate::recipe::{Dependency, Recipe, RecipeSnapshot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

/// Which candidate wins when several in-store recipes satisfy a dependency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    #[default]
    Highest,
    Lowest,
}

/// Tie-break rules for dependency resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    /// Preferred version among satisfying candidates
    #[serde(default)]
    pub prefer: Preference,
    /// Preferred build number among candidates with the same version
    #[serde(default)]
    pub prefer_build: Preference,
}

impl ResolutionPolicy {
    /// Order two candidates so the preferred one compares greater
    fn rank(&self, a: &Recipe, b: &Recipe) -> Ordering {
        let by_version = a.version.cmp(&b.version);
        let by_version = match self.prefer {
            Preference::Highest => by_version,
            Preference::Lowest => by_version.reverse(),
        };
        let by_build = a.id.build_number.cmp(&b.id.build_number);
        let by_build = match self.prefer_build {
            Preference::Highest => by_build,
            Preference::Lowest => by_build.reverse(),
        };
        by_version.then(by_build)
    }
}

/// What a dependency resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeTarget {
    /// Another recipe in the snapshot
    Recipe(usize),
    /// Not built here; assumed satisfiable by the package resolver
    External,
}

/// A resolved dependency of one recipe
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub dependency: Dependency,
    pub target: EdgeTarget,
}

impl DependencyEdge {
    pub fn is_build_time(&self) -> bool {
        self.dependency.kind.is_build_time()
    }

    pub fn is_external(&self) -> bool {
        self.target == EdgeTarget::External
    }
}

/// Directed graph over the recipes of one snapshot
///
/// Nodes are indices into [`DependencyGraph::recipes`].
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    recipes: Vec<Arc<Recipe>>,
    /// Outgoing edges per recipe, in declaration order (build-time first)
    edges: Vec<Vec<DependencyEdge>>,
    /// Recipes that depend on each recipe through a build-time edge
    build_dependents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Resolve every dependency in the snapshot and check for cycles
    ///
    /// Fails with [`Error::CyclicDependency`] if build-time edges form a cycle.
    pub fn build(snapshot: &RecipeSnapshot, policy: &ResolutionPolicy) -> Result<Self> {
        let recipes: Vec<Arc<Recipe>> = snapshot.recipes().to_vec();

        // Phase one: index every recipe by name
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, recipe) in recipes.iter().enumerate() {
            by_name.entry(recipe.name()).or_default().push(idx);
        }

        // Phase two: resolve against the complete index
        let mut edges = Vec::with_capacity(recipes.len());
        let mut build_dependents = vec![BTreeSet::new(); recipes.len()];
        for (idx, recipe) in recipes.iter().enumerate() {
            let mut out = Vec::new();
            for dep in recipe.all_deps() {
                let target = by_name
                    .get(dep.name.as_str())
                    .and_then(|candidates| {
                        candidates
                            .iter()
                            .copied()
                            .filter(|&c| c != idx && recipes[c].name() != recipe.name())
                            .filter(|&c| dep.constraint.satisfies(&recipes[c].version))
                            .max_by(|&a, &b| policy.rank(&recipes[a], &recipes[b]))
                    })
                    .map_or(EdgeTarget::External, EdgeTarget::Recipe);

                if let EdgeTarget::Recipe(target_idx) = target {
                    debug!("{} -> {} ({})", recipe.id, recipes[target_idx].id, dep.kind);
                    if dep.kind.is_build_time() {
                        build_dependents[target_idx].insert(idx);
                    }
                } else {
                    debug!("{} -> {} (external, {})", recipe.id, dep, dep.kind);
                }
                out.push(DependencyEdge {
                    dependency: dep.clone(),
                    target,
                });
            }
            edges.push(out);
        }

        let graph = Self {
            recipes,
            edges,
            build_dependents,
        };

        if let Some(cycle) = graph.find_cycle() {
            let names = cycle
                .iter()
                .map(|&i| graph.recipes[i].name().to_string())
                .collect();
            return Err(Error::CyclicDependency { cycle: names });
        }

        info!(
            "Dependency graph: {} recipes, {} in-store edges",
            graph.len(),
            graph.edges.iter().flatten().filter(|e| !e.is_external()).count()
        );
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn recipes(&self) -> &[Arc<Recipe>] {
        &self.recipes
    }

    pub fn recipe(&self, idx: usize) -> &Arc<Recipe> {
        &self.recipes[idx]
    }

    /// Indices of every recipe with this name, in identity order
    pub fn find(&self, name: &str) -> Vec<usize> {
        (0..self.recipes.len())
            .filter(|&i| self.recipes[i].name() == name)
            .collect()
    }

    /// All resolved edges of a recipe
    pub fn edges(&self, idx: usize) -> &[DependencyEdge] {
        &self.edges[idx]
    }

    /// In-store recipes this recipe needs at build time
    pub fn build_dependencies(&self, idx: usize) -> BTreeSet<usize> {
        self.edges[idx]
            .iter()
            .filter(|e| e.is_build_time())
            .filter_map(|e| match e.target {
                EdgeTarget::Recipe(t) => Some(t),
                EdgeTarget::External => None,
            })
            .collect()
    }

    /// Build-time dependencies left to the package resolver
    pub fn external_build_dependencies(&self, idx: usize) -> Vec<&Dependency> {
        self.edges[idx]
            .iter()
            .filter(|e| e.is_build_time() && e.is_external())
            .map(|e| &e.dependency)
            .collect()
    }

    /// Recipes that directly depend on this one at build time
    pub fn dependents(&self, idx: usize) -> &BTreeSet<usize> {
        &self.build_dependents[idx]
    }

    /// Every recipe that transitively depends on this one at build time
    pub fn transitive_dependents(&self, idx: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.build_dependents[idx].iter().copied().collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.build_dependents[next].iter().copied());
            }
        }

        seen
    }

    /// Every in-store recipe this one transitively needs at build time
    pub fn transitive_dependencies(&self, idx: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.build_dependencies(idx).into_iter().collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.build_dependencies(next));
            }
        }

        seen
    }

    /// Build order via Kahn's algorithm (dependencies before dependents)
    ///
    /// Ties are broken by index so the order is stable between runs.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = (0..self.len())
            .map(|i| self.build_dependencies(i).len())
            .collect();
        let mut ready: BTreeSet<usize> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.build_dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    /// Recipes named in `names` plus everything they need at build time
    pub fn selection(&self, names: &[String]) -> Result<BTreeSet<usize>> {
        let mut selected = BTreeSet::new();
        for name in names {
            let matches = self.find(name);
            if matches.is_empty() {
                return Err(Error::NotFound(format!("No recipe named '{}'", name)));
            }
            for idx in matches {
                selected.insert(idx);
                selected.extend(self.transitive_dependencies(idx));
            }
        }
        Ok(selected)
    }

    /// Graphviz rendering; external dependencies drawn dashed
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph recipes {\n    rankdir=LR;\n");
        for recipe in &self.recipes {
            let _ = writeln!(out, "    \"{}\";", recipe.id);
        }
        for (idx, edges) in self.edges.iter().enumerate() {
            let from = &self.recipes[idx].id;
            for edge in edges {
                let style = if edge.is_build_time() { "solid" } else { "dotted" };
                match edge.target {
                    EdgeTarget::Recipe(t) => {
                        let _ = writeln!(
                            out,
                            "    \"{}\" -> \"{}\" [style={}];",
                            from, self.recipes[t].id, style
                        );
                    }
                    EdgeTarget::External => {
                        let _ = writeln!(
                            out,
                            "    \"{}\" -> \"{}\" [style=dashed, color=gray];",
                            from, edge.dependency.name
                        );
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }

    /// First build-time cycle found by depth-first search, in dependency order
    fn find_cycle(&self) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut path: Vec<usize> = Vec::new();

        for start in 0..self.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // Explicit stack of (node, remaining deps) to avoid deep recursion
            let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();
            marks[start] = Mark::OnPath;
            path.push(start);
            stack.push((start, self.ordered_build_deps(start)));

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(dep) => match marks[dep] {
                        Mark::OnPath => {
                            let pos = path.iter().position(|&n| n == dep).unwrap_or(0);
                            return Some(path[pos..].to_vec());
                        }
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnPath;
                            path.push(dep);
                            stack.push((dep, self.ordered_build_deps(dep)));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    /// Build deps reversed so popping yields declaration order
    fn ordered_build_deps(&self, idx: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self.edges[idx]
            .iter()
            .filter(|e| e.is_build_time())
            .filter_map(|e| match e.target {
                EdgeTarget::Recipe(t) => Some(t),
                EdgeTarget::External => None,
            })
            .collect();
        deps.reverse();
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{recipe, recipe_with_number};

    fn graph(recipes: Vec<Recipe>) -> Result<DependencyGraph> {
        let snapshot = RecipeSnapshot::from_recipes("/recipes", recipes);
        DependencyGraph::build(&snapshot, &ResolutionPolicy::default())
    }

    fn names(graph: &DependencyGraph, order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|&i| graph.recipe(i).name().to_string())
            .collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_empty_graph() {
        let g = graph(vec![]).unwrap();
        assert!(g.is_empty());
        assert!(g.topological_order().is_empty());
    }

    #[test]
    fn test_linear_dependencies() {
        let g = graph(vec![
            recipe("c", "1.0", &["b"], &[]),
            recipe("b", "1.0", &["a"], &[]),
            recipe("a", "1.0", &[], &[]),
        ])
        .unwrap();

        let order = names(&g, &g.topological_order());
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_dependencies() {
        let g = graph(vec![
            recipe("top", "1.0", &["left", "right"], &[]),
            recipe("left", "1.0", &["base"], &[]),
            recipe("right", "1.0", &["base"], &[]),
            recipe("base", "1.0", &[], &[]),
        ])
        .unwrap();

        let order = names(&g, &g.topological_order());
        assert_eq!(order.len(), 4);
        assert!(position(&order, "base") < position(&order, "left"));
        assert!(position(&order, "base") < position(&order, "right"));
        assert!(position(&order, "left") < position(&order, "top"));
        assert!(position(&order, "right") < position(&order, "top"));
    }

    #[test]
    fn test_external_dependency_marked() {
        let g = graph(vec![recipe("a", "1.0", &["zlib"], &["python >=3"])]).unwrap();
        assert!(g.edges(0).iter().all(|e| e.is_external()));
        assert_eq!(g.external_build_dependencies(0).len(), 1);
        assert_eq!(g.external_build_dependencies(0)[0].name, "zlib");
    }

    #[test]
    fn test_cycle_detection_names_members() {
        let err = graph(vec![
            recipe("a", "1.0", &["b"], &[]),
            recipe("b", "1.0", &["c"], &[]),
            recipe("c", "1.0", &["a"], &[]),
            recipe("d", "1.0", &[], &[]),
        ])
        .unwrap_err();

        match err {
            Error::CyclicDependency { cycle } => {
                let mut members = cycle.clone();
                members.sort();
                assert_eq!(members, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let err = graph(vec![
            recipe("a", "1.0", &["b"], &[]),
            recipe("b", "1.0", &["a"], &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { ref cycle } if cycle.len() == 2));
    }

    #[test]
    fn test_run_cycle_is_allowed() {
        let g = graph(vec![
            recipe("a", "1.0", &[], &["b"]),
            recipe("b", "1.0", &[], &["a"]),
        ])
        .unwrap();
        assert_eq!(g.topological_order().len(), 2);
    }

    #[test]
    fn test_self_dependency_is_external() {
        let g = graph(vec![recipe("perl", "5.32", &["perl 5.26"], &[])]).unwrap();
        assert!(g.edges(0)[0].is_external());
    }

    #[test]
    fn test_highest_version_preferred() {
        let g = graph(vec![
            recipe("lib", "1.0", &[], &[]),
            recipe("lib", "2.0", &[], &[]),
            recipe("lib", "3.0", &[], &[]),
            recipe("app", "1.0", &["lib <3"], &[]),
        ])
        .unwrap();

        let app = g.find("app")[0];
        let target = match g.edges(app)[0].target {
            EdgeTarget::Recipe(t) => t,
            EdgeTarget::External => panic!("expected in-store edge"),
        };
        assert_eq!(g.recipe(target).id.version, "2.0");
    }

    #[test]
    fn test_highest_build_number_breaks_tie() {
        let g = graph(vec![
            recipe_with_number("lib", "1.0", 0, &[], &[]),
            recipe_with_number("lib", "1.0", 3, &[], &[]),
            recipe_with_number("lib", "1.0", 1, &[], &[]),
            recipe("app", "1.0", &["lib"], &[]),
        ])
        .unwrap();

        let app = g.find("app")[0];
        let deps: Vec<usize> = g.build_dependencies(app).into_iter().collect();
        assert_eq!(g.recipe(deps[0]).id.build_number, 3);
    }

    #[test]
    fn test_lowest_preference() {
        let snapshot = RecipeSnapshot::from_recipes(
            "/recipes",
            vec![
                recipe("lib", "1.0", &[], &[]),
                recipe("lib", "2.0", &[], &[]),
                recipe("app", "1.0", &["lib"], &[]),
            ],
        );
        let policy = ResolutionPolicy {
            prefer: Preference::Lowest,
            prefer_build: Preference::Highest,
        };
        let g = DependencyGraph::build(&snapshot, &policy).unwrap();
        let app = g.find("app")[0];
        let dep = *g.build_dependencies(app).iter().next().unwrap();
        assert_eq!(g.recipe(dep).id.version, "1.0");
    }

    #[test]
    fn test_unsatisfied_constraint_is_external() {
        let g = graph(vec![
            recipe("lib", "1.0", &[], &[]),
            recipe("app", "1.0", &["lib >=2"], &[]),
        ])
        .unwrap();
        let app = g.find("app")[0];
        assert!(g.build_dependencies(app).is_empty());
        assert_eq!(g.external_build_dependencies(app)[0].name, "lib");
    }

    #[test]
    fn test_transitive_dependents_and_selection() {
        let g = graph(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
            recipe("c", "1.0", &["b"], &[]),
            recipe("d", "1.0", &[], &[]),
        ])
        .unwrap();

        let a = g.find("a")[0];
        let dependents = names(&g, &g.transitive_dependents(a).into_iter().collect::<Vec<_>>());
        assert_eq!(dependents, vec!["b", "c"]);

        let selected = g.selection(&["c".to_string()]).unwrap();
        let selected = names(&g, &selected.into_iter().collect::<Vec<_>>());
        assert_eq!(selected, vec!["a", "b", "c"]);
        assert!(g.selection(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_dot_output() {
        let g = graph(vec![
            recipe("a", "1.0", &["zlib"], &[]),
            recipe("b", "1.0", &["a"], &[]),
        ])
        .unwrap();
        let dot = g.to_dot();
        assert!(dot.starts_with("digraph recipes"));
        assert!(dot.contains("\"b-1.0-0\" -> \"a-1.0-0\""));
        assert!(dot.contains("\"zlib\" [style=dashed"));
    }
}
