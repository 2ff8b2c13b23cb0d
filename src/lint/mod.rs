// src/lint/mod.rs

//! Recipe linting
//!
//! The linter runs before scheduling. Its contract is "recipe in, findings
//! out": each [`LintRule`] is registered independently and evaluated on its
//! own. An `error` finding excludes the recipe from the run; warnings are
//! reported only.
//!
//! Rules can be skipped for the whole run (`[lint] skip` in the configuration)
//! or per recipe (`build.skip_lints`).

mod rules;

pub use rules::default_rules;

use crate::recipe::{Recipe, RecipeId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, info};

/// How serious a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Identifier of the rule that fired
    pub rule: String,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn error(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// A lint check over a single recipe
pub trait LintRule: Send + Sync {
    /// Stable identifier used in reports and skip lists
    fn id(&self) -> &'static str;

    /// Findings for `recipe`; empty when the rule passes
    fn evaluate(&self, recipe: &Recipe) -> Vec<Finding>;
}

/// Findings for one recipe
#[derive(Debug, Clone, Serialize)]
pub struct RecipeLint {
    pub recipe: RecipeId,
    pub path: PathBuf,
    pub findings: Vec<Finding>,
}

impl RecipeLint {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// Rule identifiers of the error findings
    pub fn error_rules(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .map(|f| f.rule.clone())
            .collect()
    }
}

/// Lint results for a set of recipes
#[derive(Debug, Clone, Default, Serialize)]
pub struct LintReport {
    pub recipes: Vec<RecipeLint>,
}

impl LintReport {
    /// Recipes excluded from scheduling
    pub fn excluded(&self) -> impl Iterator<Item = &RecipeLint> {
        self.recipes.iter().filter(|r| r.has_errors())
    }

    pub fn get(&self, id: &RecipeId) -> Option<&RecipeLint> {
        self.recipes.iter().find(|r| &r.recipe == id)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.recipes
            .iter()
            .flat_map(|r| &r.findings)
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Markdown table of all findings, one row per finding
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if self.recipes.iter().all(|r| r.findings.is_empty()) {
            out.push_str("All recipes in good condition. No problems found.\n");
            return out;
        }

        let _ = writeln!(
            out,
            "Found {} error(s) and {} warning(s).\n",
            self.error_count(),
            self.warning_count()
        );
        out.push_str("| Recipe | Path | Severity | Rule | Message |\n");
        out.push_str("|--------|------|----------|------|---------|\n");
        for lint in &self.recipes {
            for finding in &lint.findings {
                let _ = writeln!(
                    out,
                    "| `{}` | `{}` | {} | `{}` | {} |",
                    lint.recipe,
                    lint.path.display(),
                    finding.severity,
                    finding.rule,
                    finding.message.replace('|', "\\|")
                );
            }
        }
        out
    }
}

/// Runs a set of registered rules over recipes
pub struct Linter {
    rules: Vec<Box<dyn LintRule>>,
    skip: BTreeSet<String>,
    warnings_as_errors: bool,
}

impl Default for Linter {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            skip: BTreeSet::new(),
            warnings_as_errors: false,
        }
    }
}

impl Linter {
    /// Linter with no rules registered
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            skip: BTreeSet::new(),
            warnings_as_errors: false,
        }
    }

    /// Register an additional rule
    pub fn with_rule(mut self, rule: Box<dyn LintRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Skip these rule identifiers for every recipe
    pub fn with_skip<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip.extend(rules.into_iter().map(Into::into));
        self
    }

    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    /// Identifiers of all registered rules
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Evaluate every applicable rule against one recipe
    pub fn lint(&self, recipe: &Recipe) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            let id = rule.id();
            if self.skip.contains(id) || recipe.skip_lints.iter().any(|s| s == id) {
                debug!("Skipping lint {} for {}", id, recipe.id);
                continue;
            }
            findings.extend(rule.evaluate(recipe));
        }
        if self.warnings_as_errors {
            for finding in &mut findings {
                finding.severity = Severity::Error;
            }
        }
        findings
    }

    /// Lint many recipes in parallel
    pub fn lint_all(&self, recipes: &[Arc<Recipe>]) -> LintReport {
        let results: Vec<RecipeLint> = recipes
            .par_iter()
            .map(|recipe| RecipeLint {
                recipe: recipe.id.clone(),
                path: recipe.rel_path.clone(),
                findings: self.lint(recipe),
            })
            .collect();

        let report = LintReport { recipes: results };
        info!(
            "Linted {} recipes: {} error(s), {} warning(s)",
            report.recipes.len(),
            report.error_count(),
            report.warning_count()
        );
        report
    }
}
