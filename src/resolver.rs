// src/resolver.rs

//! External dependency resolution
//!
//! Dependencies that do not resolve to an in-store recipe are handed to a
//! [`PackageResolver`], which only answers whether the package can be
//! obtained for a platform. Installing it is the build environment
//! provisioner's job.

use crate::error::{Error, Result};
use crate::recipe::{Dependency, Platform};
use crate::version::PackageVersion;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Boolean capability check against the package channel
pub trait PackageResolver: Send + Sync {
    /// Whether some published package satisfies `dep` on `platform`
    fn is_satisfiable(&self, dep: &Dependency, platform: Platform) -> bool;
}

/// Resolver that treats every external dependency as available
///
/// Use this when no channel index is configured.
pub struct AssumeAvailable;

impl PackageResolver for AssumeAvailable {
    fn is_satisfiable(&self, _dep: &Dependency, _platform: Platform) -> bool {
        true
    }
}

/// Resolver backed by a channel index snapshot
///
/// The index is JSON of the form
/// `{"linux-64": {"zlib": ["1.2.11", "1.2.13"]}, "noarch": {...}}`.
/// Packages listed under `noarch` are available on every platform.
#[derive(Debug, Default, Clone)]
pub struct ChannelIndex {
    packages: HashMap<Platform, HashMap<String, Vec<PackageVersion>>>,
}

#[derive(Deserialize)]
#[serde(transparent)]
struct RawIndex(HashMap<String, HashMap<String, Vec<String>>>);

impl ChannelIndex {
    /// An index with no packages: every external dependency is unsatisfiable
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an index from a JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawIndex = serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("Invalid channel index: {}", e)))?;

        let mut packages = HashMap::new();
        for (platform, entries) in raw.0 {
            let platform: Platform = platform.parse().map_err(|_| {
                Error::ParseError(format!("Unknown platform '{}' in channel index", platform))
            })?;
            let mut parsed = HashMap::new();
            for (name, versions) in entries {
                let versions = versions
                    .iter()
                    .map(|v| PackageVersion::parse(v))
                    .collect::<Result<Vec<_>>>()?;
                parsed.insert(name, versions);
            }
            packages.insert(platform, parsed);
        }

        Ok(Self { packages })
    }

    /// Load an index file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read channel index {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Record a published package
    pub fn insert(&mut self, platform: Platform, name: &str, version: PackageVersion) {
        self.packages
            .entry(platform)
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(version);
    }

    fn matches(&self, platform: Platform, dep: &Dependency) -> bool {
        self.packages
            .get(&platform)
            .and_then(|entries| entries.get(&dep.name))
            .is_some_and(|versions| versions.iter().any(|v| dep.constraint.satisfies(v)))
    }
}

impl PackageResolver for ChannelIndex {
    fn is_satisfiable(&self, dep: &Dependency, platform: Platform) -> bool {
        let found = self.matches(platform, dep) || self.matches(Platform::Noarch, dep);
        debug!("Channel lookup {} on {}: {}", dep, platform, found);
        found
    }
}
