// src/recipe/kitchen/cook.rs

//! Cook: the build execution for a single task
//!
//! Layout of one disposable environment:
//!
//! ```text
//! <work_dir>/biocook-env-XXXX/
//!   .lock       held for the lifetime of the cook
//!   build.sh    the recipe's build script
//!   build/      $BUILD_PREFIX: dependency packages unpacked here
//!   prefix/     $PREFIX: the build installs here; packaged afterwards
//!   src/        $SRC_DIR: copy of the recipe directory, build cwd
//!   tmp/        $TMPDIR and $HOME
//! ```

use crate::artifact::ArtifactRecord;
use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::recipe::RECIPE_FILE;
use crate::scheduler::{BuildJob, BuiltArtifact, CancelToken, Cause};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;
use walkdir::WalkDir;

use super::archive::{pack_dir, unpack};
use super::config::ENV_DIR_PREFIX;
use super::Kitchen;

/// Longest single wait before re-checking cancellation and the deadline
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// How a child process ended
enum StepExit {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// A single cook operation
pub struct Cook<'a> {
    kitchen: &'a Kitchen,
    job: &'a BuildJob,
    /// Removed on drop, which covers every exit path including unwinding
    env: TempDir,
    _env_lock: File,
    build_prefix: PathBuf,
    prefix: PathBuf,
    src_dir: PathBuf,
    tmp_dir: PathBuf,
    log_path: PathBuf,
    log: File,
    shell: PathBuf,
    /// Set when the build script starts; covers the script and the tests
    deadline: Option<Instant>,
}

impl<'a> Cook<'a> {
    /// Create the environment directory and open the task log
    pub(super) fn new(kitchen: &'a Kitchen, job: &'a BuildJob) -> Result<Self> {
        let config = &kitchen.config;
        let shell = which::which(&config.shell).map_err(|e| {
            Error::EnvironmentSetup(format!(
                "Build shell {} not found: {}",
                config.shell.display(),
                e
            ))
        })?;
        fs::create_dir_all(&config.work_dir).map_err(|e| {
            Error::EnvironmentSetup(format!(
                "Failed to create work dir {}: {}",
                config.work_dir.display(),
                e
            ))
        })?;

        let env = tempfile::Builder::new()
            .prefix(ENV_DIR_PREFIX)
            .tempdir_in(&config.work_dir)
            .map_err(|e| Error::EnvironmentSetup(format!("Failed to create build environment: {}", e)))?;

        let env_lock = File::create(env.path().join(".lock"))?;
        env_lock
            .lock_exclusive()
            .map_err(|e| Error::EnvironmentSetup(format!("Failed to lock build environment: {}", e)))?;

        let build_prefix = env.path().join("build");
        let prefix = env.path().join("prefix");
        let src_dir = env.path().join("src");
        let tmp_dir = env.path().join("tmp");
        for dir in [&build_prefix, &prefix, &src_dir, &tmp_dir] {
            fs::create_dir_all(dir)?;
        }

        let log_path = kitchen.log_path(job);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = File::create(&log_path).map_err(|e| {
            Error::EnvironmentSetup(format!("Failed to open log {}: {}", log_path.display(), e))
        })?;

        debug!("Build environment for {} at {}", job.label(), env.path().display());

        Ok(Self {
            kitchen,
            job,
            env,
            _env_lock: env_lock,
            build_prefix,
            prefix,
            src_dir,
            tmp_dir,
            log_path,
            log,
            shell,
            deadline: None,
        })
    }

    pub(super) fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Phase 1: Prep - materialize sources, dependencies and the script
    pub(super) fn prep(&mut self) -> Result<()> {
        let job = self.job;
        let kitchen = self.kitchen;
        let recipe = &job.recipe;
        self.log_line(&format!("=== prep {} ===", job.label()));

        copy_recipe_dir(&recipe.dir, &self.src_dir)?;

        let script = recipe.script_text()?.ok_or_else(|| {
            Error::EnvironmentSetup(format!("{} has no build script", recipe.id))
        })?;
        fs::write(self.env.path().join("build.sh"), script)?;

        for key in &job.dependency_artifacts {
            let bytes = kitchen.store.get(key).map_err(|e| {
                Error::EnvironmentSetup(format!("Dependency {} unavailable: {}", key, e))
            })?;
            unpack(&bytes, &self.build_prefix)?;
            self.log_line(&format!("installed {}", key));
        }

        kitchen
            .provisioner
            .provision(&job.external_deps, job.platform, &self.build_prefix)
            .map_err(|e| Error::EnvironmentSetup(format!("Provisioning failed: {}", e)))?;

        Ok(())
    }

    /// Phase 2: Simmer - run the build script
    pub(super) fn simmer(&mut self, cancel: &CancelToken) -> std::result::Result<(), Cause> {
        self.log_line("=== build ===");
        let mut cmd = self.command();
        cmd.arg("-e").arg(self.env.path().join("build.sh"));

        match self.run(cmd, cancel) {
            Ok(StepExit::Exited(status)) if status.success() => Ok(()),
            Ok(StepExit::Exited(status)) => Err(Cause::BuildFailure {
                exit_code: status.code(),
                log: Some(self.log_path.clone()),
            }),
            Ok(StepExit::TimedOut) => Err(self.timeout_cause()),
            Ok(StepExit::Cancelled) => Err(Cause::Cancelled),
            Err(e) => Err(Cause::RunnerCrashed {
                message: e.to_string(),
            }),
        }
    }

    /// Phase 3: Taste - run the recipe's test commands against the prefix
    pub(super) fn taste(&mut self, cancel: &CancelToken) -> std::result::Result<(), Cause> {
        for command in self.job.recipe.tests.clone() {
            if command.trim().is_empty() {
                continue;
            }
            self.log_line(&format!("=== test: {} ===", command));
            let mut cmd = self.command();
            cmd.arg("-e").arg("-c").arg(&command);

            match self.run(cmd, cancel) {
                Ok(StepExit::Exited(status)) if status.success() => {}
                Ok(StepExit::Exited(status)) => {
                    return Err(Cause::TestFailure {
                        command,
                        exit_code: status.code(),
                        log: Some(self.log_path.clone()),
                    });
                }
                Ok(StepExit::TimedOut) => return Err(self.timeout_cause()),
                Ok(StepExit::Cancelled) => return Err(Cause::Cancelled),
                Err(e) => {
                    return Err(Cause::RunnerCrashed {
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Phase 4: Plate - archive the prefix and register the artifact
    pub(super) fn plate(&mut self) -> Result<BuiltArtifact> {
        let bytes = pack_dir(&self.prefix)?;
        let content_hash = hash_bytes(&bytes);
        let size = bytes.len() as u64;

        let record = ArtifactRecord {
            content_hash: content_hash.clone(),
            source_checksum: self.job.recipe.checksum.clone(),
            recipe: self.job.recipe.id.clone(),
            platform: self.job.platform,
            created_at: Utc::now(),
            log_path: Some(self.log_path.clone()),
            size,
        };
        self.kitchen.store.put(&self.job.key, &bytes, &record)?;

        self.log_line(&format!("=== packaged {} ({} bytes, {}) ===", self.job.key, size, content_hash));
        info!("Cooked {} ({} bytes)", self.job.key, size);

        Ok(BuiltArtifact {
            content_hash,
            size,
            log: Some(self.log_path.clone()),
        })
    }

    /// Shell command with the build environment applied
    fn command(&self) -> Command {
        let config = &self.kitchen.config;
        let recipe = &self.job.recipe;
        let host_path = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
        let path = format!(
            "{}:{}:{}",
            self.prefix.join("bin").display(),
            self.build_prefix.join("bin").display(),
            host_path
        );

        let mut cmd = Command::new(&self.shell);
        cmd.env_clear()
            .current_dir(&self.src_dir)
            .env("PATH", path)
            .env("HOME", &self.tmp_dir)
            .env("TMPDIR", &self.tmp_dir)
            .env("LANG", "C.UTF-8")
            .env("PREFIX", &self.prefix)
            .env("BUILD_PREFIX", &self.build_prefix)
            .env("SRC_DIR", &self.src_dir)
            .env("RECIPE_DIR", &recipe.dir)
            .env("PKG_NAME", recipe.name())
            .env("PKG_VERSION", &recipe.id.version)
            .env("PKG_BUILDNUM", recipe.id.build_number.to_string())
            .env("TARGET_PLATFORM", self.job.platform.as_ref())
            .env("CPU_COUNT", config.cpu_count.to_string());
        cmd
    }

    /// Run a child with output captured into the log, enforcing the deadline
    fn run(&mut self, mut cmd: Command, cancel: &CancelToken) -> Result<StepExit> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(self.log.try_clone()?))
            .stderr(Stdio::from(self.log.try_clone()?));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::IoError(format!("Failed to spawn build shell: {}", e)))?;
        let timeout = self.kitchen.config.timeout;
        let deadline = *self.deadline.get_or_insert_with(|| Instant::now() + timeout);

        loop {
            if cancel.is_cancelled() {
                kill_process_group(&mut child);
                self.log_line("=== cancelled ===");
                return Ok(StepExit::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                kill_process_group(&mut child);
                self.log_line("=== timed out ===");
                return Ok(StepExit::TimedOut);
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            if let Some(status) = child.wait_timeout(slice)? {
                self.log_line(&format!("=== exit: {} ===", status));
                return Ok(StepExit::Exited(status));
            }
        }
    }

    fn timeout_cause(&self) -> Cause {
        Cause::Timeout {
            secs: self.kitchen.config.timeout.as_secs(),
            log: Some(self.log_path.clone()),
        }
    }

    fn log_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.log, "{}", line) {
            warn!("Failed to write build log {}: {}", self.log_path.display(), e);
        }
    }
}

/// Kill the child and everything it spawned, then reap it
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", child.id(), e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Copy a recipe directory, leaving out nested recipe directories
fn copy_recipe_dir(from: &Path, to: &Path) -> Result<()> {
    let walker = WalkDir::new(from).min_depth(1).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir() && e.path().join(RECIPE_FILE).is_file())
    });

    for entry in walker {
        let entry = entry
            .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", from.display(), e)))?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
