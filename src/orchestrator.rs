// src/orchestrator.rs

//! End-to-end build runs
//!
//! One run goes through these stages, each consuming the previous one's
//! output:
//!
//! 1. scan the recipe store into a snapshot
//! 2. build the dependency graph (cycles abort the run here)
//! 3. lint every recipe; error findings exclude a recipe
//! 4. narrow to the selected recipes and their build-time closure
//! 5. classify every (recipe, platform) task against the artifact store
//! 6. schedule the tasks that need building, packaging each success
//! 7. summarize everything into a [`RunReport`]
//!
//! A dry run stops after classification and reports what would be built.

use crate::artifact::{ArtifactStore, FsArtifactStore};
use crate::classify::{BuildPlan, ClassifyOptions};
use crate::config::BiocookConfig;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::lint::LintReport;
use crate::package::{ContainerRegistry, PackageChannel, Packager};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::recipe::kitchen::{Kitchen, Provisioner};
use crate::recipe::{RecipeId, RecipeSnapshot, RecipeStore};
use crate::report::RunReport;
use crate::resolver::{AssumeAvailable, ChannelIndex, PackageResolver};
use crate::scheduler::{self, BuildExecutor, CancelToken, Scheduler, SchedulerConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// Per-invocation choices that are not part of the configuration file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recipe names to build, with their build-time dependencies; empty = all
    pub selection: Vec<String>,
    /// Classify and report without building
    pub dry_run: bool,
}

/// Everything computed before scheduling
pub struct Prepared {
    pub snapshot: RecipeSnapshot,
    pub graph: DependencyGraph,
    pub lint: LintReport,
    pub plan: BuildPlan,
}

impl Prepared {
    /// Rule identifiers that exclude each lint-failing recipe
    pub fn lint_excluded(&self) -> HashMap<RecipeId, Vec<String>> {
        self.lint
            .excluded()
            .map(|l| (l.recipe.clone(), l.error_rules()))
            .collect()
    }
}

/// Drives recipe store scans and build runs
pub struct Orchestrator {
    store_root: PathBuf,
    config: BiocookConfig,
    artifacts: Arc<dyn ArtifactStore>,
    resolver: Arc<dyn PackageResolver>,
    executor: Option<Arc<dyn BuildExecutor>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    registry: Option<Arc<dyn ContainerRegistry>>,
    channel: Option<Arc<dyn PackageChannel>>,
    progress: Arc<dyn ProgressTracker>,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Orchestrator for the store at `store_root` using on-disk artifacts
    ///
    /// Opens the artifact store and, when configured, loads the channel
    /// index. Both failures are run-fatal.
    pub fn new(store_root: impl Into<PathBuf>, config: BiocookConfig) -> Result<Self> {
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::open(config.artifact_dir())?);
        let resolver: Arc<dyn PackageResolver> = match &config.channel.index {
            Some(path) => Arc::new(ChannelIndex::load(path)?),
            None => Arc::new(AssumeAvailable),
        };

        Ok(Self {
            store_root: store_root.into(),
            config,
            artifacts,
            resolver,
            executor: None,
            provisioner: None,
            registry: None,
            channel: None,
            progress: Arc::new(SilentProgress::new()),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PackageResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the kitchen with another build runner
    pub fn with_executor(mut self, executor: Arc<dyn BuildExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn ContainerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn PackageChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BiocookConfig {
        &self.config
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn scan(&self) -> Result<RecipeSnapshot> {
        RecipeStore::new(&self.store_root).scan()
    }

    /// Stages 1 through 5
    pub fn prepare(&self, options: &RunOptions) -> Result<Prepared> {
        let snapshot = self.scan()?;
        let graph = DependencyGraph::build(&snapshot, &self.config.resolution)?;
        let lint = self.config.linter().lint_all(graph.recipes());

        let selection = if options.selection.is_empty() {
            None
        } else {
            Some(graph.selection(&options.selection)?)
        };
        let classify = ClassifyOptions {
            platforms: self.config.platform_set(),
            selection,
            force: self.config.force,
        };
        let plan = BuildPlan::classify(
            &graph,
            self.artifacts.as_ref(),
            self.resolver.as_ref(),
            &classify,
        )?;

        Ok(Prepared {
            snapshot,
            graph,
            lint,
            plan,
        })
    }

    /// Run the full pipeline
    ///
    /// Errors are run-fatal problems only. Per-task failures are reported in
    /// the returned [`RunReport`].
    pub fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let _span = info_span!("run", dry_run = options.dry_run).entered();
        let prepared = self.prepare(options)?;
        let lint_excluded = prepared.lint_excluded();

        let mut report = RunReport::new(options.dry_run, self.config.platform_set());
        report.record_problems(prepared.snapshot.problems());
        report.record_lint(&prepared.lint);
        info!("Run {} over {} tasks", report.run_id, prepared.plan.len());

        if options.dry_run {
            let preview = scheduler::preview(&prepared.plan, &lint_excluded);
            report.record_preview(preview.tasks, &prepared.plan);
            report.finish();
            return Ok(report);
        }

        let mut kitchen = Kitchen::new(self.config.kitchen_config(), Arc::clone(&self.artifacts));
        if let Some(provisioner) = &self.provisioner {
            kitchen = kitchen.with_provisioner(Arc::clone(provisioner));
        }
        if let Err(e) = kitchen.sweep_stale_environments() {
            warn!("Failed to sweep stale build environments: {}", e);
        }
        let executor: &dyn BuildExecutor = match &self.executor {
            Some(executor) => executor.as_ref(),
            None => &kitchen,
        };

        let packager = self.config.packaging.enabled.then(|| {
            let mut packager =
                Packager::new(self.config.packager_config(), Arc::clone(&self.artifacts));
            if let Some(registry) = &self.registry {
                packager = packager.with_registry(Arc::clone(registry));
            }
            if let Some(channel) = &self.channel {
                packager = packager.with_channel(Arc::clone(channel));
            }
            packager
        });

        let mut scheduler = Scheduler::new(
            SchedulerConfig::default().with_jobs(self.config.effective_jobs()),
            executor,
            self.progress.as_ref(),
        )
        .with_cancel(self.cancel.clone());
        if let Some(packager) = &packager {
            scheduler = scheduler.with_post_build(packager);
        }

        let outcome = scheduler.run(&prepared.plan, &lint_excluded);
        report.record_tasks(outcome.tasks);
        report.finish();

        if report.cancelled {
            self.progress.finish_with_error("cancelled");
        } else {
            self.progress.finish_with_message(&format!(
                "{} built, {} up-to-date, {} failed",
                report.counts.succeeded, report.counts.up_to_date, report.counts.failed
            ));
        }

        info!(
            "Run {} finished: {} succeeded, {} failed, {} blocked",
            report.run_id, report.counts.succeeded, report.counts.failed, report.counts.blocked
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::scheduler::{BuiltArtifact, JobOutcome, TaskState};
    use crate::scheduler::BuildJob;
    use crate::hash::hash_bytes;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every build and stores an empty package for it
    struct FakeKitchen {
        store: Arc<MemoryArtifactStore>,
        built: Mutex<Vec<String>>,
    }

    impl BuildExecutor for FakeKitchen {
        fn build(&self, job: &BuildJob, _cancel: &CancelToken) -> JobOutcome {
            self.built.lock().unwrap().push(job.recipe.name().to_string());
            let bytes = job.recipe.name().as_bytes().to_vec();
            let record = crate::artifact::ArtifactRecord {
                content_hash: hash_bytes(&bytes),
                source_checksum: job.recipe.checksum.clone(),
                recipe: job.recipe.id.clone(),
                platform: job.platform,
                created_at: chrono::Utc::now(),
                log_path: None,
                size: bytes.len() as u64,
            };
            match self.store.put(&job.key, &bytes, &record) {
                Ok(()) => JobOutcome::Succeeded(BuiltArtifact {
                    content_hash: record.content_hash,
                    size: record.size,
                    log: None,
                }),
                Err(e) => JobOutcome::Failed((&e).into()),
            }
        }
    }

    fn write_recipe(root: &Path, name: &str, build: &[&str]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let deps = build
            .iter()
            .map(|d| format!("\"{}\"", d))
            .collect::<Vec<_>>()
            .join(", ");
        std::fs::write(
            dir.join("recipe.toml"),
            format!(
                "[package]\nname = \"{name}\"\nversion = \"1.0\"\n\n[build]\nscript = \"true\"\n\n\
                 [requirements]\nbuild = [{deps}]\n\n[test]\ncommands = [\"true\"]\n\n\
                 [about]\nhome = \"https://example.org\"\nlicense = \"MIT\"\nsummary = \"{name}\"\n"
            ),
        )
        .unwrap();
    }

    fn orchestrator(root: &Path, work: &Path) -> (Orchestrator, Arc<FakeKitchen>) {
        let store = Arc::new(MemoryArtifactStore::new());
        let kitchen = Arc::new(FakeKitchen {
            store: Arc::clone(&store),
            built: Mutex::new(Vec::new()),
        });
        let mut config = BiocookConfig::default();
        config.artifact_dir = Some(work.join("artifacts"));
        config.staging_dir = Some(work.join("staging"));
        config.work_dir = Some(work.join("work"));
        config.jobs = 2;
        let orchestrator = Orchestrator::new(root, config)
            .unwrap()
            .with_artifact_store(store)
            .with_executor(kitchen.clone());
        (orchestrator, kitchen)
    }

    #[test]
    fn test_second_run_builds_nothing() {
        let recipes = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_recipe(recipes.path(), "zlib", &[]);
        write_recipe(recipes.path(), "htslib", &["zlib"]);
        let (orchestrator, kitchen) = orchestrator(recipes.path(), work.path());

        let first = orchestrator.run(&RunOptions::default()).unwrap();
        assert_eq!(first.counts.succeeded, 2);
        assert!(first.is_success());
        assert_eq!(*kitchen.built.lock().unwrap(), vec!["zlib", "htslib"]);

        let second = orchestrator.run(&RunOptions::default()).unwrap();
        assert_eq!(second.counts.up_to_date, 2);
        assert_eq!(kitchen.built.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_dry_run_builds_nothing() {
        let recipes = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_recipe(recipes.path(), "zlib", &[]);
        let (orchestrator, kitchen) = orchestrator(recipes.path(), work.path());

        let report = orchestrator
            .run(&RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.counts.planned, 1);
        assert_eq!(report.tasks[0].record.state, TaskState::Ready);
        assert_eq!(report.tasks[0].planned.as_deref(), Some("would build (missing)"));
        assert!(kitchen.built.lock().unwrap().is_empty());
    }

    #[test]
    fn test_selection_limits_run() {
        let recipes = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_recipe(recipes.path(), "zlib", &[]);
        write_recipe(recipes.path(), "htslib", &["zlib"]);
        write_recipe(recipes.path(), "unrelated", &[]);
        let (orchestrator, kitchen) = orchestrator(recipes.path(), work.path());

        let report = orchestrator
            .run(&RunOptions {
                selection: vec!["htslib".into()],
                dry_run: false,
            })
            .unwrap();
        assert_eq!(report.counts.total(), 2);
        assert!(!kitchen.built.lock().unwrap().contains(&"unrelated".to_string()));

        let missing = orchestrator.run(&RunOptions {
            selection: vec!["nope".into()],
            dry_run: false,
        });
        assert!(missing.is_err());
    }
}
