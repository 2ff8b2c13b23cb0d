// src/lint/rules.rs

//! Built-in lint rules
//!
//! Each rule is an independent predicate over one recipe.

use super::{Finding, LintRule};
use crate::recipe::{BuildScript, Recipe};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Every built-in rule, in reporting order
pub fn default_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(InvalidName),
        Box::new(MissingBuildScript),
        Box::new(MissingTests),
        Box::new(NoPlatforms),
        Box::new(DuplicateDependency),
        Box::new(SelfRunDependency),
        Box::new(CompilerInNoarch),
        Box::new(MissingLicense),
        Box::new(MissingHome),
        Box::new(MissingSummary),
    ]
}

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*$").unwrap());

/// Package names are lowercase and limited to a safe character set
pub struct InvalidName;

impl LintRule for InvalidName {
    fn id(&self) -> &'static str {
        "invalid_name"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        if NAME_RE.is_match(recipe.name()) {
            return Vec::new();
        }
        vec![Finding::error(
            self.id(),
            format!(
                "Package name '{}' must be lowercase letters, digits and ._+-",
                recipe.name()
            ),
        )]
    }
}

pub struct MissingBuildScript;

impl LintRule for MissingBuildScript {
    fn id(&self) -> &'static str {
        "missing_build_script"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        match &recipe.script {
            None => vec![Finding::error(
                self.id(),
                "No build script: set build.script or add build.sh",
            )],
            Some(BuildScript::Inline(text)) if text.trim().is_empty() => {
                vec![Finding::error(self.id(), "Inline build script is empty")]
            }
            Some(BuildScript::File(rel)) if !recipe.dir.join(rel).is_file() => {
                vec![Finding::error(
                    self.id(),
                    format!("Build script {} does not exist", rel.display()),
                )]
            }
            Some(_) => Vec::new(),
        }
    }
}

pub struct MissingTests;

impl LintRule for MissingTests {
    fn id(&self) -> &'static str {
        "missing_tests"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        if recipe.tests.iter().any(|t| !t.trim().is_empty()) {
            return Vec::new();
        }
        vec![Finding::error(self.id(), "No test commands in [test]")]
    }
}

pub struct NoPlatforms;

impl LintRule for NoPlatforms {
    fn id(&self) -> &'static str {
        "no_platforms"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        if recipe.noarch || !recipe.platforms.is_empty() {
            return Vec::new();
        }
        vec![Finding::error(self.id(), "build.platforms is empty")]
    }
}

/// The same package listed twice in one requirements section
pub struct DuplicateDependency;

impl LintRule for DuplicateDependency {
    fn id(&self) -> &'static str {
        "duplicate_dependency"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut seen = HashSet::new();
        for dep in recipe.all_deps() {
            if !seen.insert((dep.kind, dep.name.as_str())) {
                findings.push(Finding::error(
                    self.id(),
                    format!("'{}' listed more than once in {} requirements", dep.name, dep.kind),
                ));
            }
        }
        findings
    }
}

pub struct SelfRunDependency;

impl LintRule for SelfRunDependency {
    fn id(&self) -> &'static str {
        "self_run_dependency"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        if recipe.run_deps.iter().any(|d| d.name == recipe.name()) {
            return vec![Finding::error(self.id(), "Package lists itself as a run requirement")];
        }
        Vec::new()
    }
}

const COMPILERS: &[&str] = &[
    "gcc",
    "gxx",
    "gfortran",
    "clang",
    "clangxx",
    "c-compiler",
    "cxx-compiler",
    "fortran-compiler",
];

/// Noarch packages cannot contain compiled code
pub struct CompilerInNoarch;

impl LintRule for CompilerInNoarch {
    fn id(&self) -> &'static str {
        "compiler_in_noarch"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        if !recipe.noarch {
            return Vec::new();
        }
        recipe
            .build_deps
            .iter()
            .filter(|d| COMPILERS.contains(&d.name.as_str()))
            .map(|d| {
                Finding::error(
                    self.id(),
                    format!("noarch recipe requires compiler '{}'", d.name),
                )
            })
            .collect()
    }
}

pub struct MissingLicense;

impl LintRule for MissingLicense {
    fn id(&self) -> &'static str {
        "missing_license"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        missing_field(self.id(), recipe.about.license.as_deref(), "about.license")
    }
}

pub struct MissingHome;

impl LintRule for MissingHome {
    fn id(&self) -> &'static str {
        "missing_home"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        missing_field(self.id(), recipe.about.home.as_deref(), "about.home")
    }
}

pub struct MissingSummary;

impl LintRule for MissingSummary {
    fn id(&self) -> &'static str {
        "missing_summary"
    }

    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding> {
        missing_field(self.id(), recipe.about.summary.as_deref(), "about.summary")
    }
}

fn missing_field(rule: &'static str, value: Option<&str>, field: &str) -> Vec<Finding> {
    match value {
        Some(v) if !v.trim().is_empty() => Vec::new(),
        _ => vec![Finding::warning(rule, format!("{} is not set", field))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::Severity;
    use crate::test_support::recipe;

    #[test]
    fn test_clean_recipe_passes_all_rules() {
        let r = recipe("samtools", "1.9", &["make"], &["htslib"]);
        for rule in default_rules() {
            assert!(rule.evaluate(&r).is_empty(), "rule {} fired", rule.id());
        }
    }

    #[test]
    fn test_invalid_name() {
        let r = recipe("SamTools", "1.9", &[], &[]);
        let findings = InvalidName.evaluate(&r);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn test_missing_build_script() {
        let mut r = recipe("a", "1.0", &[], &[]);
        r.script = None;
        assert_eq!(MissingBuildScript.evaluate(&r).len(), 1);

        r.script = Some(BuildScript::Inline("  ".to_string()));
        assert_eq!(MissingBuildScript.evaluate(&r).len(), 1);

        r.script = Some(BuildScript::File("build.sh".into()));
        assert_eq!(MissingBuildScript.evaluate(&r).len(), 1);
    }

    #[test]
    fn test_missing_tests() {
        let mut r = recipe("a", "1.0", &[], &[]);
        r.tests.clear();
        assert_eq!(MissingTests.evaluate(&r)[0].rule, "missing_tests");
    }

    #[test]
    fn test_duplicate_dependency() {
        let r = recipe("a", "1.0", &["zlib", "zlib >=1.2"], &["zlib"]);
        let findings = DuplicateDependency.evaluate(&r);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_self_run_dependency() {
        let r = recipe("a", "1.0", &[], &["a"]);
        assert_eq!(SelfRunDependency.evaluate(&r).len(), 1);
    }

    #[test]
    fn test_compiler_in_noarch() {
        let mut r = recipe("a", "1.0", &["gcc", "make"], &[]);
        assert!(CompilerInNoarch.evaluate(&r).is_empty());
        r.noarch = true;
        assert_eq!(CompilerInNoarch.evaluate(&r).len(), 1);
    }

    #[test]
    fn test_no_platforms() {
        let mut r = recipe("a", "1.0", &[], &[]);
        r.platforms.clear();
        assert_eq!(NoPlatforms.evaluate(&r).len(), 1);
        r.noarch = true;
        assert!(NoPlatforms.evaluate(&r).is_empty());
    }

    #[test]
    fn test_about_fields_are_warnings() {
        let mut r = recipe("a", "1.0", &[], &[]);
        r.about = Default::default();
        for rule in [
            &MissingLicense as &dyn LintRule,
            &MissingHome,
            &MissingSummary,
        ] {
            let findings = rule.evaluate(&r);
            assert_eq!(findings.len(), 1);
            assert_eq!(findings[0].severity, Severity::Warning);
        }
    }
}
