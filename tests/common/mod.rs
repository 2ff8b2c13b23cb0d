// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use biocook::artifact::ArtifactRecord;
use biocook::hash::hash_bytes;
use biocook::scheduler::{BuildExecutor, BuildJob, BuiltArtifact, CancelToken, Cause, JobOutcome};
use biocook::{ArtifactStore, BiocookConfig, MemoryArtifactStore, Orchestrator, Platform};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// A recipe store written into a temporary directory
pub struct RecipeTree {
    pub dir: TempDir,
}

impl RecipeTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a lint-clean recipe with the given build requirements
    pub fn recipe(&self, name: &str, build: &[&str]) -> PathBuf {
        self.recipe_with(name, "1.0", build, "true", &["true"])
    }

    pub fn recipe_with(
        &self,
        name: &str,
        version: &str,
        build: &[&str],
        script: &str,
        tests: &[&str],
    ) -> PathBuf {
        let dir = self.root().join(format!("{}-{}", name, version));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("build.sh"), script).unwrap();
        std::fs::write(
            dir.join("recipe.toml"),
            format!(
                r#"[package]
name = "{name}"
version = "{version}"

[build]
number = 0
platforms = ["linux-64"]

[requirements]
host = [{build}]

[test]
commands = [{tests}]

[about]
home = "https://example.org/{name}"
license = "MIT"
summary = "Test package {name}"
"#,
                build = quoted(build),
                tests = quoted(tests),
            ),
        )
        .unwrap();
        dir
    }
}

fn quoted(items: &[&str]) -> String {
    items
        .iter()
        .map(|i| format!("{:?}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// In-process build runner that records what it was asked to do
///
/// Successful builds store a small package so later runs see them as
/// up-to-date.
pub struct FakeKitchen {
    pub store: Arc<MemoryArtifactStore>,
    pub fail: HashSet<String>,
    pub delay: Duration,
    pub events: Mutex<Vec<(String, &'static str)>>,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeKitchen {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryArtifactStore::new()),
            fail: HashSet::new(),
            delay: Duration::ZERO,
            events: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.fail.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Names of every recipe built, in start order
    pub fn built(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| *e == "start")
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Position of an event in the log
    pub fn index(&self, name: &str, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .position(|(n, e)| n == name && *e == event)
            .unwrap_or_else(|| panic!("no {} event for {}", event, name))
    }
}

impl BuildExecutor for FakeKitchen {
    fn build(&self, job: &BuildJob, _cancel: &CancelToken) -> JobOutcome {
        let name = job.recipe.name().to_string();
        self.events.lock().unwrap().push((name.clone(), "start"));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push((name.clone(), "finish"));

        if self.fail.contains(&name) {
            return JobOutcome::Failed(Cause::BuildFailure {
                exit_code: Some(1),
                log: None,
            });
        }

        let bytes = format!("package {}", job.key).into_bytes();
        let record = ArtifactRecord {
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
            Err(e) => JobOutcome::Failed(Cause::RunnerCrashed {
                message: e.to_string(),
            }),
        }
    }
}

/// Configuration with every directory under `work` and linux-64 only
pub fn test_config(work: &Path, jobs: usize) -> BiocookConfig {
    let mut config = BiocookConfig::default();
    config.jobs = jobs;
    config.platforms = vec![Platform::Linux64];
    config.artifact_dir = Some(work.join("artifacts"));
    config.staging_dir = Some(work.join("staging"));
    config.work_dir = Some(work.join("work"));
    config
}

/// Orchestrator over `tree` that builds with `kitchen`
pub fn orchestrator(
    tree: &RecipeTree,
    work: &Path,
    jobs: usize,
    kitchen: &Arc<FakeKitchen>,
) -> Orchestrator {
    let store: Arc<dyn ArtifactStore> = kitchen.store.clone();
    let executor: Arc<dyn BuildExecutor> = kitchen.clone();
    Orchestrator::new(tree.root(), test_config(work, jobs))
        .unwrap()
        .with_artifact_store(store)
        .with_executor(executor)
}
