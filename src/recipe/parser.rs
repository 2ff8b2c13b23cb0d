// src/recipe/parser.rs

//! Recipe file parsing

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::recipe::format::{
    BuildScript, DEFAULT_SCRIPT_FILE, Dependency, DependencyKind, Platform, Recipe, RecipeFile,
    RecipeId,
};
use crate::version::PackageVersion;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Parse a recipe document from a TOML string
pub fn parse_recipe(content: &str) -> Result<RecipeFile> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))
}

/// Parse a recipe document from a file
pub fn parse_recipe_file(path: &Path) -> Result<RecipeFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read recipe file: {}", e)))?;

    parse_recipe(&content)
}

/// Validate a parsed document and turn it into a recipe record
///
/// `dir` is the absolute recipe directory, `rel_path` its location relative to
/// the store root. Structural problems (empty identity, unparseable versions,
/// unknown platforms, conflicting script settings) are errors here; style and
/// completeness checks belong to the linter.
pub fn into_recipe(
    file: RecipeFile,
    dir: &Path,
    rel_path: PathBuf,
    checksum: Digest,
) -> Result<Recipe> {
    let name = file.package.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }
    let version_str = file.package.version.trim().to_string();
    if version_str.is_empty() {
        return Err(Error::ParseError("Recipe package version cannot be empty".to_string()));
    }
    let version = PackageVersion::parse(&version_str)?;

    let mut build_deps = Vec::new();
    for spec in &file.requirements.build {
        build_deps.push(Dependency::parse(spec, DependencyKind::Build)?);
    }
    for spec in &file.requirements.host {
        build_deps.push(Dependency::parse(spec, DependencyKind::Host)?);
    }
    let run_deps = file
        .requirements
        .run
        .iter()
        .map(|spec| Dependency::parse(spec, DependencyKind::Run))
        .collect::<Result<Vec<_>>>()?;

    let platforms = match &file.build.platforms {
        None => Platform::concrete(),
        Some(list) => list
            .iter()
            .map(|p| {
                p.parse::<Platform>()
                    .map_err(|_| Error::ParseError(format!("Unknown platform '{}'", p)))
            })
            .collect::<Result<BTreeSet<_>>>()?,
    };

    let script = match (&file.build.script, &file.build.script_file) {
        (Some(_), Some(_)) => {
            return Err(Error::ParseError(
                "Recipe sets both build.script and build.script_file".to_string(),
            ));
        }
        (Some(text), None) => Some(BuildScript::Inline(text.clone())),
        (None, Some(rel)) => Some(BuildScript::File(PathBuf::from(rel))),
        (None, None) if dir.join(DEFAULT_SCRIPT_FILE).is_file() => {
            Some(BuildScript::File(PathBuf::from(DEFAULT_SCRIPT_FILE)))
        }
        (None, None) => None,
    };

    Ok(Recipe {
        id: RecipeId::new(name, version_str, file.build.number),
        version,
        build_deps,
        run_deps,
        platforms,
        noarch: file.build.noarch,
        script,
        tests: file.test.commands,
        about: file.about,
        skip_lints: file.build.skip_lints,
        dir: dir.to_path_buf(),
        rel_path,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn record(content: &str) -> Result<Recipe> {
        let file = parse_recipe(content)?;
        into_recipe(
            file,
            Path::new("/nonexistent/recipes/test"),
            PathBuf::from("test"),
            hash_bytes(content.as_bytes()),
        )
    }

    #[test]
    fn test_parse_valid_recipe() {
        let content = r#"
[package]
name = "samtools"
version = "1.9"

[build]
number = 2
script = "make install PREFIX=$PREFIX"
platforms = ["linux-64", "osx-64"]

[requirements]
build = ["make", "gcc >=9"]
host = ["htslib 1.9.*"]
run = ["htslib >=1.9,<2"]
"#;

        let recipe = record(content).unwrap();
        assert_eq!(recipe.id, RecipeId::new("samtools", "1.9", 2));
        assert_eq!(recipe.build_deps.len(), 3);
        assert_eq!(recipe.build_deps[2].kind, DependencyKind::Host);
        assert_eq!(recipe.run_deps.len(), 1);
        assert_eq!(recipe.platforms.len(), 2);
        assert!(matches!(recipe.script, Some(BuildScript::Inline(_))));
    }

    #[test]
    fn test_parse_invalid_recipe() {
        let content = "this is not valid toml at all {}";
        assert!(parse_recipe(content).is_err());
    }

    #[test]
    fn test_missing_version_is_error() {
        let content = r#"
[package]
name = "test"
"#;
        assert!(parse_recipe(content).is_err());
    }

    #[test]
    fn test_empty_name_is_error() {
        let content = r#"
[package]
name = ""
version = "1.0"
"#;
        assert!(record(content).is_err());
    }

    #[test]
    fn test_unknown_platform_is_error() {
        let content = r#"
[package]
name = "test"
version = "1.0"

[build]
platforms = ["amiga-68k"]
"#;
        assert!(record(content).is_err());
    }

    #[test]
    fn test_conflicting_scripts_is_error() {
        let content = r#"
[package]
name = "test"
version = "1.0"

[build]
script = "true"
script_file = "build.sh"
"#;
        assert!(record(content).is_err());
    }

    #[test]
    fn test_defaults() {
        let content = r#"
[package]
name = "test"
version = "1.0"
"#;
        let recipe = record(content).unwrap();
        assert_eq!(recipe.id.build_number, 0);
        assert_eq!(recipe.platforms, Platform::concrete());
        assert!(recipe.script.is_none());
        assert!(!recipe.noarch);
    }
}
