// src/recipe/kitchen/provision.rs

//! Provisioning of external build dependencies

use crate::error::Result;
use crate::recipe::{Dependency, Platform};
use std::path::Path;
use tracing::debug;

/// Installs build dependencies that are not built from the recipe store
///
/// This keeps the Kitchen decoupled from the package manager that actually
/// knows how to fetch published packages into a prefix.
pub trait Provisioner: Send + Sync {
    /// Make `deps` available inside `prefix` for a build targeting `platform`
    fn provision(&self, deps: &[Dependency], platform: Platform, prefix: &Path) -> Result<()>;
}

/// A provisioner that assumes external dependencies are already on `PATH`
///
/// Use this in a pre-configured build container.
pub struct NoopProvisioner;

impl Provisioner for NoopProvisioner {
    fn provision(&self, deps: &[Dependency], platform: Platform, _prefix: &Path) -> Result<()> {
        if !deps.is_empty() {
            debug!(
                "Assuming external deps present for {}: {}",
                platform,
                deps.iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(())
    }
}
