// src/error.rs

//! Error types for the biocook orchestrator
//!
//! Errors fall into two classes. Run-fatal errors (cycles, unreadable stores,
//! bad configuration) abort a run before anything is scheduled. Everything
//! else is contained at the task boundary and surfaces as a task outcome in
//! the run summary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for biocook operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the orchestrator and its components
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Failed to parse a document (recipe, config, index)
    #[error("parse error: {0}")]
    ParseError(String),

    /// A recipe directory whose metadata could not be parsed
    #[error("malformed recipe at {}: {reason}", .path.display())]
    MalformedRecipe { path: PathBuf, reason: String },

    /// Two recipe directories declare the same (name, version, build-number);
    /// collected like a malformed recipe, the later path is excluded
    #[error("duplicate recipe {identity} at {} (first seen at {})", .path.display(), .first.display())]
    DuplicateRecipe {
        identity: String,
        path: PathBuf,
        first: PathBuf,
    },

    /// Build-time dependency cycle; members listed in dependency order
    #[error("cyclic build dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    /// A task state change the scheduler does not permit
    #[error("invalid task transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    /// Build exceeded its time budget
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Run was cancelled by the operator
    #[error("cancelled")]
    Cancelled,

    /// The disposable build environment could not be materialized
    #[error("environment setup failed: {0}")]
    EnvironmentSetup(String),

    /// Staging or uploading a finished artifact failed
    #[error("packaging error: {0}")]
    PackagingError(String),

    /// A requested item does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error aborts the whole run rather than one task
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CyclicDependency { .. } | Error::ConfigError(_)
        )
    }
}

fn format_cycle(cycle: &[String]) -> String {
    let mut out = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        out.push_str(" -> ");
        out.push_str(first);
    }
    out
}
