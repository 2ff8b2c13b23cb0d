// src/config.rs

//! Configuration file parsing for biocook
//!
//! Supports a TOML file with top-level run settings and these sections:
//! - [resolution] - Tie-break rules for in-store dependency matches
//! - [lint] - Skipped rules, warning promotion
//! - [packaging] - Staging, image namespace, upload retries
//! - [channel] - External package index
//!
//! Relative paths are resolved against the directory holding the file.
//! Command-line flags override file values.

use crate::error::{Error, Result};
use crate::graph::ResolutionPolicy;
use crate::lint::Linter;
use crate::package::PackagerConfig;
use crate::recipe::Platform;
use crate::recipe::kitchen::KitchenConfig;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file looked up in the recipe store root when `--config` is absent
pub const CONFIG_FILE: &str = "biocook.toml";

/// TOML configuration file structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BiocookConfig {
    /// Maximum simultaneous build jobs (0 = number of CPUs)
    #[serde(default)]
    pub jobs: usize,

    /// Target platforms (empty = the host platform)
    #[serde(default)]
    pub platforms: Vec<Platform>,

    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// Artifact store root
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Staging root for packages and images
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Parent of disposable build environments
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Rebuild up-to-date artifacts
    #[serde(default)]
    pub force: bool,

    #[serde(default)]
    pub resolution: ResolutionPolicy,

    #[serde(default)]
    pub lint: LintSection,

    #[serde(default)]
    pub packaging: PackagingSection,

    #[serde(default)]
    pub channel: ChannelSection,
}

impl Default for BiocookConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            platforms: Vec::new(),
            job_timeout_secs: default_job_timeout(),
            io_timeout_secs: default_io_timeout(),
            artifact_dir: None,
            staging_dir: None,
            work_dir: None,
            force: false,
            resolution: ResolutionPolicy::default(),
            lint: LintSection::default(),
            packaging: PackagingSection::default(),
            channel: ChannelSection::default(),
        }
    }
}

/// Lint configuration section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LintSection {
    /// Rule identifiers skipped for every recipe
    #[serde(default)]
    pub skip: Vec<String>,

    #[serde(default)]
    pub warnings_as_errors: bool,
}

/// Packaging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_base_image")]
    pub base_image: String,

    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub upload_retry_delay_secs: u64,
}

impl Default for PackagingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_namespace(),
            base_image: default_base_image(),
            upload_attempts: default_upload_attempts(),
            upload_retry_delay_secs: default_retry_delay(),
        }
    }
}

/// External package index section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    /// JSON index of packages available outside the recipe store
    #[serde(default)]
    pub index: Option<PathBuf>,
}

fn default_job_timeout() -> u64 {
    3600
}

fn default_io_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "biocontainers".to_string()
}

fn default_base_image() -> String {
    PackagerConfig::default().base_image
}

fn default_upload_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

impl BiocookConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::parse(&content).map_err(|e| match e {
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit file if given, else `biocook.toml` in the store root, else defaults
    pub fn discover(explicit: Option<&Path>, store_root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = store_root.join(CONFIG_FILE);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_timeout_secs == 0 {
            return Err(Error::ConfigError("job_timeout_secs must be positive".into()));
        }
        if self.io_timeout_secs == 0 {
            return Err(Error::ConfigError("io_timeout_secs must be positive".into()));
        }
        if self.packaging.upload_attempts == 0 {
            return Err(Error::ConfigError(
                "packaging.upload_attempts must be at least 1".into(),
            ));
        }
        if self.packaging.namespace.trim().is_empty() {
            return Err(Error::ConfigError("packaging.namespace must not be empty".into()));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.artifact_dir,
            &mut self.staging_dir,
            &mut self.work_dir,
            &mut self.channel.index,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Requested platforms; the host platform when none are configured
    pub fn platform_set(&self) -> BTreeSet<Platform> {
        if self.platforms.is_empty() {
            [Platform::host()].into_iter().collect()
        } else {
            self.platforms.iter().copied().collect()
        }
    }

    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| cache_root().join("artifacts"))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| cache_root().join("staging"))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| cache_root().join("work"))
    }

    /// Kitchen settings; logs live next to the artifacts
    pub fn kitchen_config(&self) -> KitchenConfig {
        KitchenConfig::default()
            .with_work_dir(self.work_dir())
            .with_log_dir(self.artifact_dir().join("logs"))
            .with_timeout(self.job_timeout())
    }

    pub fn packager_config(&self) -> PackagerConfig {
        PackagerConfig {
            staging_dir: self.staging_dir(),
            namespace: self.packaging.namespace.clone(),
            base_image: self.packaging.base_image.clone(),
            upload_attempts: self.packaging.upload_attempts,
            retry_delay: Duration::from_secs(self.packaging.upload_retry_delay_secs),
            io_timeout: self.io_timeout(),
        }
    }

    /// Default rule set with this configuration's skips applied
    pub fn linter(&self) -> Linter {
        Linter::default()
            .with_skip(self.lint.skip.iter().cloned())
            .with_warnings_as_errors(self.lint.warnings_as_errors)
    }
}

fn cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("biocook")
}
