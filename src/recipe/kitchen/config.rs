// src/recipe/kitchen/config.rs

//! Configuration types for the Kitchen

use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every disposable build environment directory
pub const ENV_DIR_PREFIX: &str = "biocook-env-";

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Parent directory of the per-job build environments
    pub work_dir: PathBuf,
    /// Where build logs are written, one file per task
    pub log_dir: PathBuf,
    /// Wall-clock budget for build script plus tests
    pub timeout: Duration,
    /// Value exported as `CPU_COUNT` to build scripts
    pub cpu_count: u32,
    /// Interpreter for build scripts and test commands
    pub shell: PathBuf,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        let cache = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("biocook");

        Self {
            work_dir: cache.join("work"),
            log_dir: cache.join("artifacts").join("logs"),
            timeout: Duration::from_secs(3600),
            cpu_count,
            shell: PathBuf::from("sh"),
        }
    }
}

impl KitchenConfig {
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kitchen_config_default() {
        let config = KitchenConfig::default();
        assert!(config.cpu_count > 0);
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert!(config.work_dir.ends_with("biocook/work"));
    }

    #[test]
    fn test_builders() {
        let config = KitchenConfig::default()
            .with_work_dir("/tmp/w")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.work_dir, PathBuf::from("/tmp/w"));
        assert_eq!(config.timeout.as_secs(), 5);
    }
}
