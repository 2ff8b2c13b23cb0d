// src/recipe/kitchen/mod.rs

//! Kitchen: disposable build environments for cooking recipes
//!
//! The Kitchen is the build job runner. Each task gets its own environment
//! directory under the work dir, exclusively owned for the duration of the
//! job. A cook goes through four phases:
//! - **Prep**: copy the recipe, unpack dependency packages, provision externals
//! - **Simmer**: run the build script with `sh -e`
//! - **Taste**: run the recipe's test commands
//! - **Plate**: archive `$PREFIX` and register it in the artifact store
//!
//! Build output of every phase goes to one log file per task. The job
//! timeout covers simmer and taste together; on timeout or cancellation the
//! whole process group is killed. The environment directory is removed when
//! the cook is dropped, so teardown happens on every exit path.

mod archive;
mod config;
mod cook;
mod provision;

pub use archive::{pack_dir, unpack};
pub use config::{ENV_DIR_PREFIX, KitchenConfig};
pub use cook::Cook;
pub use provision::{NoopProvisioner, Provisioner};

use crate::artifact::ArtifactStore;
use crate::error::Result;
use crate::scheduler::{BuildExecutor, BuildJob, CancelToken, Cause, JobOutcome};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    store: Arc<dyn ArtifactStore>,
    provisioner: Arc<dyn Provisioner>,
}

impl Kitchen {
    /// Create a Kitchen that stores finished packages in `store`
    pub fn new(config: KitchenConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            config,
            store,
            provisioner: Arc::new(NoopProvisioner),
        }
    }

    /// Use `provisioner` for build dependencies from outside the recipe store
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    /// Log file for a job: `<log_dir>/<platform>/<name>-<version>-<build>.log`
    pub fn log_path(&self, job: &BuildJob) -> PathBuf {
        self.config.log_dir.join(job.platform.as_ref()).join(format!(
            "{}-{}-{}.log",
            job.key.name, job.key.version, job.key.build_number
        ))
    }

    /// Remove environments left behind by crashed runs
    ///
    /// Live environments hold an exclusive lock on their `.lock` file and are
    /// left alone, so this is safe while other runs share the work dir.
    pub fn sweep_stale_environments(&self) -> Result<usize> {
        let work_dir = &self.config.work_dir;
        if !work_dir.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(work_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let is_env = name.to_string_lossy().starts_with(ENV_DIR_PREFIX);
            if !is_env || !entry.file_type()?.is_dir() {
                continue;
            }

            let path = entry.path();
            let in_use = match File::open(path.join(".lock")) {
                Ok(lock) => lock.try_lock_exclusive().is_err(),
                Err(_) => false,
            };
            if in_use {
                debug!("Environment {} is in use", path.display());
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale environment {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale build environments from {}", removed, work_dir.display());
        }
        Ok(removed)
    }

    /// Cook one job through all phases
    pub fn cook(&self, job: &BuildJob, cancel: &CancelToken) -> JobOutcome {
        let mut cook = match Cook::new(self, job) {
            Ok(cook) => cook,
            Err(e) => {
                return JobOutcome::Failed(Cause::EnvironmentSetup {
                    message: e.to_string(),
                });
            }
        };

        info!("Prep: materializing environment");
        if let Err(e) = cook.prep() {
            warn!("Environment setup for {} failed: {}", job.label(), e);
            return JobOutcome::Failed(Cause::EnvironmentSetup {
                message: e.to_string(),
            });
        }

        info!("Simmering: running build script");
        if let Err(cause) = cook.simmer(cancel) {
            return failed_or_cancelled(cause);
        }

        info!("Tasting: running tests");
        if let Err(cause) = cook.taste(cancel) {
            return failed_or_cancelled(cause);
        }

        if cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        info!("Plating: storing package");
        match cook.plate() {
            Ok(artifact) => JobOutcome::Succeeded(artifact),
            Err(e) => JobOutcome::Failed(Cause::RunnerCrashed {
                message: format!(
                    "failed to store package (log: {}): {}",
                    cook.log_path().display(),
                    e
                ),
            }),
        }
    }
}

fn failed_or_cancelled(cause: Cause) -> JobOutcome {
    match cause {
        Cause::Cancelled => JobOutcome::Cancelled,
        cause => JobOutcome::Failed(cause),
    }
}

impl BuildExecutor for Kitchen {
    fn build(&self, job: &BuildJob, cancel: &CancelToken) -> JobOutcome {
        self.cook(job, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactKey, MemoryArtifactStore};
    use crate::recipe::{BuildScript, Dependency, Platform, Recipe};
    use crate::test_support::recipe;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        recipe_dir: PathBuf,
        store: Arc<MemoryArtifactStore>,
        kitchen: Kitchen,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let recipe_dir = tmp.path().join("recipes");
        fs::create_dir_all(&recipe_dir).unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let config = KitchenConfig::default()
            .with_work_dir(tmp.path().join("work"))
            .with_log_dir(tmp.path().join("logs"))
            .with_timeout(timeout);
        let kitchen = Kitchen::new(config, store.clone());
        Fixture {
            _tmp: tmp,
            recipe_dir,
            store,
            kitchen,
        }
    }

    fn job(fx: &Fixture, mut r: Recipe, script: &str, deps: Vec<ArtifactKey>) -> BuildJob {
        r.dir = fx.recipe_dir.join(r.name());
        fs::create_dir_all(&r.dir).unwrap();
        fs::write(r.dir.join("data.txt"), "payload").unwrap();
        r.script = Some(BuildScript::Inline(script.to_string()));
        let key = ArtifactKey::new(&r.id, Platform::Linux64);
        BuildJob {
            recipe: Arc::new(r),
            platform: Platform::Linux64,
            key,
            dependency_artifacts: deps,
            external_deps: Vec::new(),
        }
    }

    fn env_dirs(fx: &Fixture) -> usize {
        match fs::read_dir(&fx.kitchen.config.work_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn test_successful_build_stores_package() {
        let fx = fixture(Duration::from_secs(30));
        let job = job(
            &fx,
            recipe("hello", "1.0", &[], &[]),
            "mkdir -p $PREFIX/share && cp data.txt $PREFIX/share/ && echo built $PKG_NAME",
            Vec::new(),
        );

        let outcome = fx.kitchen.cook(&job, &CancelToken::new());
        let artifact = match outcome {
            JobOutcome::Succeeded(a) => a,
            other => panic!("unexpected outcome {:?}", other),
        };

        let record = fx.store.record(&job.key).unwrap().unwrap();
        assert_eq!(record.content_hash, artifact.content_hash);
        assert_eq!(record.source_checksum, job.recipe.checksum);

        let out = TempDir::new().unwrap();
        unpack(&fx.store.get(&job.key).unwrap(), out.path()).unwrap();
        assert_eq!(
            fs::read_to_string(out.path().join("share/data.txt")).unwrap(),
            "payload"
        );

        let log = fs::read_to_string(artifact.log.unwrap()).unwrap();
        assert!(log.contains("built hello"));
        assert_eq!(env_dirs(&fx), 0);
    }

    #[test]
    fn test_failing_script_reports_exit_code_and_log() {
        let fx = fixture(Duration::from_secs(30));
        let job = job(&fx, recipe("bad", "1.0", &[], &[]), "echo oops >&2; exit 3", Vec::new());

        match fx.kitchen.cook(&job, &CancelToken::new()) {
            JobOutcome::Failed(Cause::BuildFailure { exit_code, log }) => {
                assert_eq!(exit_code, Some(3));
                assert!(fs::read_to_string(log.unwrap()).unwrap().contains("oops"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!fx.store.exists(&job.key).unwrap());
        assert_eq!(env_dirs(&fx), 0);
    }

    #[test]
    fn test_timeout_kills_build_and_tears_down() {
        let fx = fixture(Duration::from_millis(300));
        let job = job(&fx, recipe("slow", "1.0", &[], &[]), "sleep 30", Vec::new());

        let started = Instant::now();
        let outcome = fx.kitchen.cook(&job, &CancelToken::new());
        assert!(matches!(outcome, JobOutcome::Failed(Cause::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(env_dirs(&fx), 0);
    }

    struct SlowProvisioner(Duration);

    impl Provisioner for SlowProvisioner {
        fn provision(&self, _deps: &[Dependency], _platform: Platform, _prefix: &Path) -> Result<()> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_timeout_starts_with_build_script() {
        let mut fx = fixture(Duration::from_millis(300));
        fx.kitchen = Kitchen::new(fx.kitchen.config.clone(), fx.store.clone())
            .with_provisioner(Arc::new(SlowProvisioner(Duration::from_millis(600))));
        let job = job(&fx, recipe("prepped", "1.0", &[], &[]), "true", Vec::new());

        let outcome = fx.kitchen.cook(&job, &CancelToken::new());
        assert!(matches!(outcome, JobOutcome::Succeeded(_)), "{:?}", outcome);
    }

    #[test]
    fn test_failing_test_command() {
        let fx = fixture(Duration::from_secs(30));
        let mut r = recipe("untested", "1.0", &[], &[]);
        r.tests = vec!["test -f $PREFIX/bin/missing".to_string()];
        let job = job(&fx, r, "true", Vec::new());

        match fx.kitchen.cook(&job, &CancelToken::new()) {
            JobOutcome::Failed(Cause::TestFailure { command, exit_code, .. }) => {
                assert_eq!(command, "test -f $PREFIX/bin/missing");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!fx.store.exists(&job.key).unwrap());
    }

    #[test]
    fn test_cancelled_before_start() {
        let fx = fixture(Duration::from_secs(30));
        let job = job(&fx, recipe("c", "1.0", &[], &[]), "sleep 30", Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(fx.kitchen.cook(&job, &cancel), JobOutcome::Cancelled));
        assert_eq!(env_dirs(&fx), 0);
    }

    #[test]
    fn test_dependency_packages_in_build_prefix_only() {
        let fx = fixture(Duration::from_secs(30));
        let lib = job(
            &fx,
            recipe("lib", "1.0", &[], &[]),
            "mkdir -p $PREFIX/bin && printf '#!/bin/sh\\necho from-lib\\n' > $PREFIX/bin/hellolib-tool && chmod +x $PREFIX/bin/hellolib-tool",
            Vec::new(),
        );
        assert!(matches!(
            fx.kitchen.cook(&lib, &CancelToken::new()),
            JobOutcome::Succeeded(_)
        ));

        let app = job(
            &fx,
            recipe("app", "1.0", &["lib"], &[]),
            "mkdir -p $PREFIX/share && hellolib-tool > $PREFIX/share/out.txt",
            vec![lib.key.clone()],
        );
        assert!(matches!(
            fx.kitchen.cook(&app, &CancelToken::new()),
            JobOutcome::Succeeded(_)
        ));

        let out = TempDir::new().unwrap();
        unpack(&fx.store.get(&app.key).unwrap(), out.path()).unwrap();
        assert_eq!(
            fs::read_to_string(out.path().join("share/out.txt")).unwrap(),
            "from-lib\n"
        );
        assert!(!out.path().join("bin/hellolib-tool").exists());
    }

    #[test]
    fn test_missing_dependency_is_environment_failure() {
        let fx = fixture(Duration::from_secs(30));
        let ghost = ArtifactKey::new(&crate::recipe::RecipeId::new("ghost", "1", 0), Platform::Linux64);
        let job = job(&fx, recipe("app", "1.0", &[], &[]), "true", vec![ghost]);
        assert!(matches!(
            fx.kitchen.cook(&job, &CancelToken::new()),
            JobOutcome::Failed(Cause::EnvironmentSetup { .. })
        ));
        assert_eq!(env_dirs(&fx), 0);
    }

    #[test]
    fn test_sweep_removes_only_unlocked_environments() {
        let fx = fixture(Duration::from_secs(30));
        let work = &fx.kitchen.config.work_dir;
        let stale = work.join(format!("{}stale", ENV_DIR_PREFIX));
        let live = work.join(format!("{}live", ENV_DIR_PREFIX));
        let other = work.join("unrelated");
        for dir in [&stale, &live, &other] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(stale.join(".lock"), "").unwrap();
        let held = File::create(live.join(".lock")).unwrap();
        held.lock_exclusive().unwrap();

        assert_eq!(fx.kitchen.sweep_stale_environments().unwrap(), 1);
        assert!(!stale.exists());
        assert!(live.exists());
        assert!(other.exists());
    }
}
