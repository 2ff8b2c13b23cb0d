// src/recipe/format.rs

//! Recipe file format and the in-memory recipe record
//!
//! `RecipeFile` mirrors the TOML document on disk. `Recipe` is the validated,
//! immutable record produced by the store reader: identity, ordered
//! dependencies, supported platforms, build script reference and a content
//! checksum over the whole recipe directory.

use crate::hash::Digest;
use crate::version::{PackageVersion, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Name of the metadata document inside each recipe directory
pub const RECIPE_FILE: &str = "recipe.toml";

/// Build script picked up when a recipe names none
pub const DEFAULT_SCRIPT_FILE: &str = "build.sh";

/// Target platform for a build task
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum Platform {
    #[serde(rename = "linux-64")]
    #[strum(serialize = "linux-64")]
    Linux64,
    #[serde(rename = "linux-aarch64")]
    #[strum(serialize = "linux-aarch64")]
    LinuxAarch64,
    #[serde(rename = "osx-64")]
    #[strum(serialize = "osx-64")]
    Osx64,
    #[serde(rename = "osx-arm64")]
    #[strum(serialize = "osx-arm64")]
    OsxArm64,
    #[serde(rename = "noarch")]
    #[strum(serialize = "noarch")]
    Noarch,
}

impl Platform {
    /// All platforms a non-noarch recipe can target
    pub fn concrete() -> BTreeSet<Platform> {
        use strum::IntoEnumIterator;
        Platform::iter().filter(|p| *p != Platform::Noarch).collect()
    }

    /// Best guess at the platform of the machine running the orchestrator
    pub fn host() -> Platform {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("macos", "aarch64") => Platform::OsxArm64,
            ("macos", _) => Platform::Osx64,
            ("linux", "aarch64") => Platform::LinuxAarch64,
            _ => Platform::Linux64,
        }
    }
}

/// Unique identity of a recipe within a store snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipeId {
    pub name: String,
    pub version: String,
    pub build_number: u32,
}

impl RecipeId {
    pub fn new(name: impl Into<String>, version: impl Into<String>, build_number: u32) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build_number,
        }
    }
}

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build_number)
    }
}

/// Where a dependency is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DependencyKind {
    /// Build tools
    Build,
    /// Libraries linked against at build time
    Host,
    /// Needed when the package is installed
    Run,
}

impl DependencyKind {
    pub fn is_build_time(&self) -> bool {
        matches!(self, DependencyKind::Build | DependencyKind::Host)
    }
}

/// A declared dependency: package name plus version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: VersionConstraint,
    pub kind: DependencyKind,
}

impl Dependency {
    /// Parse a requirement line such as `htslib >=1.9,<2`
    pub fn parse(spec: &str, kind: DependencyKind) -> crate::Result<Self> {
        let spec = spec.trim();
        let (name, constraint) = match spec.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (spec, ""),
        };
        if name.is_empty() {
            return Err(crate::Error::ParseError("Empty dependency name".to_string()));
        }
        if name.contains(['<', '>', '=', '!', ',', '|']) {
            return Err(crate::Error::ParseError(format!(
                "Dependency '{}' needs whitespace between name and constraint",
                spec
            )));
        }
        let constraint = VersionConstraint::parse(constraint).map_err(|e| {
            crate::Error::ParseError(format!("Dependency '{}': {}", spec, e))
        })?;
        Ok(Self {
            name: name.to_string(),
            constraint,
            kind,
        })
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.name, self.constraint)
        }
    }
}

/// Reference to the script that performs the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildScript {
    /// Script text embedded in the metadata document
    Inline(String),
    /// Script file, relative to the recipe directory
    File(PathBuf),
}

/// Descriptive metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct About {
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// A recipe record, immutable for the duration of a run
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: RecipeId,
    /// Parsed form of `id.version`
    pub version: PackageVersion,
    /// Build and host requirements, in declaration order
    pub build_deps: Vec<Dependency>,
    /// Run requirements, in declaration order
    pub run_deps: Vec<Dependency>,
    /// Platforms the recipe supports
    pub platforms: BTreeSet<Platform>,
    pub noarch: bool,
    pub script: Option<BuildScript>,
    /// Commands run in the build environment after a successful build
    pub tests: Vec<String>,
    pub about: About,
    /// Lint rules this recipe opts out of
    pub skip_lints: Vec<String>,
    /// Absolute path of the recipe directory
    pub dir: PathBuf,
    /// Path relative to the store root, used in reports
    pub rel_path: PathBuf,
    /// Digest over every file in the recipe directory
    pub checksum: Digest,
}

impl Recipe {
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// All dependencies, build-time first
    pub fn all_deps(&self) -> impl Iterator<Item = &Dependency> {
        self.build_deps.iter().chain(self.run_deps.iter())
    }

    /// Platforms to create build tasks for, given the requested set
    ///
    /// A noarch recipe builds once, on `noarch`, whatever was requested.
    pub fn target_platforms(&self, requested: &BTreeSet<Platform>) -> Vec<Platform> {
        if self.noarch {
            if requested.is_empty() {
                return Vec::new();
            }
            return vec![Platform::Noarch];
        }
        requested
            .iter()
            .filter(|p| **p != Platform::Noarch && self.platforms.contains(p))
            .copied()
            .collect()
    }

    /// Resolve the build script to its text
    pub fn script_text(&self) -> crate::Result<Option<String>> {
        match &self.script {
            None => Ok(None),
            Some(BuildScript::Inline(text)) => Ok(Some(text.clone())),
            Some(BuildScript::File(rel)) => {
                let path = self.dir.join(rel);
                std::fs::read_to_string(&path).map(Some).map_err(|e| {
                    crate::Error::IoError(format!(
                        "Failed to read build script {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

/// The `recipe.toml` document as written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    pub package: PackageSection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub requirements: RequirementsSection,

    #[serde(default)]
    pub test: TestSection,

    #[serde(default)]
    pub about: About,
}

/// Package identity section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
}

/// Build section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Build number (for rebuilds of the same version)
    #[serde(default)]
    pub number: u32,

    #[serde(default)]
    pub noarch: bool,

    /// Inline build script
    #[serde(default)]
    pub script: Option<String>,

    /// Build script file relative to the recipe directory
    #[serde(default)]
    pub script_file: Option<String>,

    /// Supported platforms (default: all concrete platforms)
    #[serde(default)]
    pub platforms: Option<Vec<String>>,

    #[serde(default)]
    pub skip_lints: Vec<String>,
}

/// Requirements section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementsSection {
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub host: Vec<String>,
    #[serde(default)]
    pub run: Vec<String>,
}

/// Test section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSection {
    #[serde(default)]
    pub commands: Vec<String>,
}
