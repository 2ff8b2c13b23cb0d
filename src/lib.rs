// src/lib.rs

//! Biocook recipe build orchestrator
//!
//! Turns a directory tree of package recipes into built, tested and
//! packaged artifacts, rebuilding only what changed.
//!
//! # Architecture
//!
//! - Snapshot-first: the recipe store is read once into an immutable snapshot
//! - Build-time graph: only build and host requirements order builds
//! - Content-addressed freshness: a recipe checksum decides up-to-date vs stale
//! - Disposable environments: every build job gets its own directory, torn
//!   down on every exit path
//! - Contained failures: a failed job blocks its dependents and nothing else

pub mod artifact;
pub mod classify;
pub mod config;
mod error;
pub mod graph;
pub mod hash;
pub mod lint;
pub mod orchestrator;
pub mod package;
pub mod progress;
pub mod recipe;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod version;

#[cfg(test)]
mod test_support;

pub use artifact::{ArtifactKey, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use classify::{BuildPlan, BuildState, ClassifyOptions};
pub use config::BiocookConfig;
pub use error::{Error, Result};
pub use graph::{DependencyGraph, Preference, ResolutionPolicy};
pub use lint::{LintReport, Linter};
pub use orchestrator::{Orchestrator, RunOptions};
pub use progress::{CliProgress, LogProgress, ProgressTracker, SilentProgress};
pub use recipe::kitchen::{Kitchen, KitchenConfig};
pub use recipe::{Platform, Recipe, RecipeId, RecipeSnapshot, RecipeStore};
pub use report::RunReport;
pub use scheduler::{CancelToken, Scheduler, SchedulerConfig, TaskState};
