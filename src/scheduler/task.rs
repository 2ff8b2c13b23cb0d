// src/scheduler/task.rs

//! Build task state machine
//!
//! ```text
//! pending ──► ready ──► running ──► succeeded
//!    │          │          ├──────► failed
//!    │          └──────────┴──────► cancelled
//!    ├──► blocked | unbuildable | up-to-date | lint-excluded | cancelled
//! ```
//!
//! Terminal states are never left. Only the scheduler's coordinator moves a
//! task between states, through [`TaskRecord::transition`].

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::recipe::{Platform, RecipeId};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::Display;

/// Scheduling state of one build task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Not attempted because a dependency failed or was excluded
    Blocked,
    /// A build-time dependency can never be satisfied
    Unbuildable,
    /// Stored artifact is current; never scheduled
    UpToDate,
    LintExcluded,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Ready | TaskState::Running)
    }

    /// Terminal states that satisfy a dependent's build-time requirement
    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::UpToDate)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match self {
            Pending => matches!(
                next,
                Ready | Blocked | Unbuildable | UpToDate | LintExcluded | Cancelled
            ),
            Ready => matches!(next, Running | Cancelled),
            Running => matches!(next, Succeeded | Failed | Cancelled),
            _ => false,
        }
    }
}

/// The single root cause recorded for a task that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Cause {
    /// Build script exited unsuccessfully
    BuildFailure {
        exit_code: Option<i32>,
        log: Option<PathBuf>,
    },
    /// Build exceeded the per-job timeout
    Timeout { secs: u64, log: Option<PathBuf> },
    /// The build environment could not be materialized
    EnvironmentSetup { message: String },
    /// The job runner panicked or failed internally
    RunnerCrashed { message: String },
    /// A post-build test command failed
    TestFailure {
        command: String,
        exit_code: Option<i32>,
        log: Option<PathBuf>,
    },
    /// A build-time dependency task failed
    DependencyFailed { dependency: String, reason: String },
    /// A build-time dependency was excluded by the linter
    DependencyExcluded { dependency: String, rules: Vec<String> },
    /// No resolution path for a build-time dependency
    UnresolvedDependency { name: String },
    /// Lint error findings
    Lint { rules: Vec<String> },
    /// Run-level cancellation
    Cancelled,
}

impl Cause {
    /// Build log attached to the failure, if any
    pub fn log(&self) -> Option<&PathBuf> {
        match self {
            Cause::BuildFailure { log, .. }
            | Cause::Timeout { log, .. }
            | Cause::TestFailure { log, .. } => log.as_ref(),
            _ => None,
        }
    }
}

impl From<&Error> for Cause {
    fn from(err: &Error) -> Self {
        match err {
            Error::EnvironmentSetup(message) => Cause::EnvironmentSetup {
                message: message.clone(),
            },
            Error::Timeout { secs } => Cause::Timeout {
                secs: *secs,
                log: None,
            },
            Error::Cancelled => Cause::Cancelled,
            other => Cause::RunnerCrashed {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::BuildFailure { exit_code, .. } => match exit_code {
                Some(code) => write!(f, "build failed with exit code {}", code),
                None => write!(f, "build terminated by signal"),
            },
            Cause::Timeout { secs, .. } => write!(f, "build timed out after {}s", secs),
            Cause::EnvironmentSetup { message } => {
                write!(f, "environment setup failed: {}", message)
            }
            Cause::RunnerCrashed { message } => write!(f, "build runner crashed: {}", message),
            Cause::TestFailure {
                command, exit_code, ..
            } => match exit_code {
                Some(code) => write!(f, "test `{}` failed with exit code {}", command, code),
                None => write!(f, "test `{}` terminated by signal", command),
            },
            Cause::DependencyFailed { dependency, reason } => {
                write!(f, "dependency {} failed: {}", dependency, reason)
            }
            Cause::DependencyExcluded { dependency, rules } => {
                write!(f, "dependency {} excluded by lint ({})", dependency, rules.join(", "))
            }
            Cause::UnresolvedDependency { name } => write!(f, "unresolvable dependency {}", name),
            Cause::Lint { rules } => write!(f, "lint error: {}", rules.join(", ")),
            Cause::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of the packaging step for a succeeded task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum PackagingStatus {
    Staged { image: String, uploaded: bool },
    Failed { message: String },
}

/// Package produced by a successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltArtifact {
    pub content_hash: Digest,
    pub size: u64,
    pub log: Option<PathBuf>,
}

/// Everything the run summary needs to know about one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub recipe: RecipeId,
    pub platform: Platform,
    pub state: TaskState,
    /// Root cause for every non-success terminal state
    pub cause: Option<Cause>,
    pub artifact: Option<BuiltArtifact>,
    pub packaging: Option<PackagingStatus>,
    #[serde(serialize_with = "duration_secs::serialize")]
    pub duration: Option<Duration>,
}

impl TaskRecord {
    pub fn new(recipe: RecipeId, platform: Platform) -> Self {
        Self {
            recipe,
            platform,
            state: TaskState::Pending,
            cause: None,
            artifact: None,
            packaging: None,
            duration: None,
        }
    }

    /// `name-version-build [platform]`
    pub fn label(&self) -> String {
        format!("{} [{}]", self.recipe, self.platform)
    }

    /// Move to `next`, rejecting anything the state machine does not allow
    pub fn transition(&mut self, next: TaskState, cause: Option<Cause>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                task: self.label(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        if cause.is_some() {
            self.cause = cause;
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }
}
