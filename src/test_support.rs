// src/test_support.rs

//! In-memory recipe fixtures for unit tests

use crate::hash::hash_bytes;
use crate::recipe::{About, BuildScript, Dependency, DependencyKind, Platform, Recipe, RecipeId};
use crate::version::PackageVersion;
use std::path::PathBuf;

/// Build a recipe record without touching the filesystem
///
/// Dependencies use requirement syntax (`"htslib >=1.9"`).
pub fn recipe(name: &str, version: &str, build: &[&str], run: &[&str]) -> Recipe {
    recipe_with_number(name, version, 0, build, run)
}

pub fn recipe_with_number(
    name: &str,
    version: &str,
    number: u32,
    build: &[&str],
    run: &[&str],
) -> Recipe {
    let build_deps = build
        .iter()
        .map(|d| Dependency::parse(d, DependencyKind::Host).unwrap())
        .collect();
    let run_deps = run
        .iter()
        .map(|d| Dependency::parse(d, DependencyKind::Run).unwrap())
        .collect();
    Recipe {
        id: RecipeId::new(name, version, number),
        version: PackageVersion::parse(version).unwrap(),
        build_deps,
        run_deps,
        platforms: Platform::concrete(),
        noarch: false,
        script: Some(BuildScript::Inline("true".to_string())),
        tests: vec!["test -d $PREFIX".to_string()],
        about: About {
            home: Some(format!("https://example.org/{name}")),
            license: Some("MIT".to_string()),
            summary: Some(format!("The {name} package")),
        },
        skip_lints: Vec::new(),
        dir: PathBuf::from(format!("/recipes/{name}")),
        rel_path: PathBuf::from(format!("{name}/{version}-{number}")),
        checksum: hash_bytes(format!("{name}-{version}-{number}").as_bytes()),
    }
}
