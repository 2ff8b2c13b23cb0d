// src/report.rs

//! Run summary
//!
//! Collects the final state of every task, the recipe problems found while
//! scanning, and the lint totals into one report. The report decides the
//! process exit status and renders as plain text, markdown, or JSON.

use crate::classify::BuildPlan;
use crate::error::{Error, Result};
use crate::lint::LintReport;
use crate::recipe::Platform;
use crate::scheduler::{Cause, PackagingStatus, TaskRecord, TaskState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

/// Task totals by final state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub succeeded: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub blocked: usize,
    pub unbuildable: usize,
    pub lint_excluded: usize,
    pub cancelled: usize,
    /// Dry runs only: tasks a real run would build
    pub planned: usize,
}

impl Counts {
    fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::UpToDate => self.up_to_date += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Blocked => self.blocked += 1,
            TaskState::Unbuildable => self.unbuildable += 1,
            TaskState::LintExcluded => self.lint_excluded += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Pending | TaskState::Ready | TaskState::Running => self.planned += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded
            + self.up_to_date
            + self.failed
            + self.blocked
            + self.unbuildable
            + self.lint_excluded
            + self.cancelled
            + self.planned
    }
}

/// One task line of the report
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub record: TaskRecord,
    /// Dry runs only: why the task would be built
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned: Option<String>,
}

/// A recipe that never became a task
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub message: String,
}

/// Everything one orchestrator run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub platforms: Vec<Platform>,
    pub counts: Counts,
    pub tasks: Vec<TaskSummary>,
    pub problems: Vec<Problem>,
    pub lint_errors: usize,
    pub lint_warnings: usize,
}

impl RunReport {
    pub fn new(dry_run: bool, platforms: impl IntoIterator<Item = Platform>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            cancelled: false,
            platforms: platforms.into_iter().collect(),
            counts: Counts::default(),
            tasks: Vec::new(),
            problems: Vec::new(),
            lint_errors: 0,
            lint_warnings: 0,
        }
    }

    /// Malformed and duplicate recipes collected by the scan
    pub fn record_problems(&mut self, problems: &[Error]) {
        self.problems.extend(problems.iter().map(|e| Problem {
            message: e.to_string(),
        }));
    }

    pub fn record_lint(&mut self, lint: &LintReport) {
        self.lint_errors = lint.error_count();
        self.lint_warnings = lint.warning_count();
    }

    /// Final task records, in plan order
    pub fn record_tasks(&mut self, tasks: Vec<TaskRecord>) {
        self.record(tasks, None);
    }

    /// Preview records for a dry run; unstarted tasks carry their build reason
    pub fn record_preview(&mut self, tasks: Vec<TaskRecord>, plan: &BuildPlan) {
        self.record(tasks, Some(plan));
    }

    fn record(&mut self, tasks: Vec<TaskRecord>, plan: Option<&BuildPlan>) {
        for (idx, record) in tasks.into_iter().enumerate() {
            self.counts.add(record.state);
            if record.state == TaskState::Cancelled {
                self.cancelled = true;
            }

            let planned = match plan {
                Some(plan) if !record.state.is_terminal() => plan
                    .tasks
                    .get(idx)
                    .map(|t| format!("would build ({})", t.state)),
                _ => None,
            };

            self.tasks.push(TaskSummary {
                record,
                planned,
            });
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// A run fails on any failed or blocked task, a lint error, an
    /// unreadable recipe, or cancellation
    ///
    /// Dependents of an unresolvable external package are classified
    /// unbuildable rather than blocked, so they never fail the run.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.counts.failed == 0
            && self.counts.blocked == 0
            && self.lint_errors == 0
            && self.problems.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Tasks that did not end in a success state
    pub fn failures(&self) -> impl Iterator<Item = &TaskSummary> {
        self.tasks.iter().filter(|t| {
            t.record.state.is_terminal()
                && !t.record.state.is_success()
                && t.record.state != TaskState::Unbuildable
        })
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;
        let _ = writeln!(
            out,
            "{} {} ({} tasks)",
            if self.dry_run { "Dry run" } else { "Run" },
            self.run_id,
            c.total()
        );
        if self.dry_run {
            let _ = writeln!(out, "  would build:   {}", c.planned);
        } else {
            let _ = writeln!(out, "  succeeded:     {}", c.succeeded);
            let _ = writeln!(out, "  failed:        {}", c.failed);
            let _ = writeln!(out, "  cancelled:     {}", c.cancelled);
        }
        let _ = writeln!(out, "  up-to-date:    {}", c.up_to_date);
        let _ = writeln!(out, "  blocked:       {}", c.blocked);
        let _ = writeln!(out, "  unbuildable:   {}", c.unbuildable);
        let _ = writeln!(out, "  lint-excluded: {}", c.lint_excluded);
        let _ = writeln!(
            out,
            "  lint: {} errors, {} warnings",
            self.lint_errors, self.lint_warnings
        );

        let mut header = false;
        for task in &self.tasks {
            let line = match (&task.record.cause, &task.planned) {
                (Some(cause), _) => format!("{}: {}", task.record.state, cause),
                (None, Some(planned)) => planned.clone(),
                (None, None) => continue,
            };
            if !header {
                out.push_str("\nTasks:\n");
                header = true;
            }
            let _ = writeln!(out, "  {}  {}", task.record.label(), line);
            if let Some(log) = task.record.cause.as_ref().and_then(Cause::log) {
                let _ = writeln!(out, "      log: {}", log.display());
            }
        }

        let packaging_failures: Vec<_> = self
            .tasks
            .iter()
            .filter_map(|t| match &t.record.packaging {
                Some(PackagingStatus::Failed { message }) => Some((t, message)),
                _ => None,
            })
            .collect();
        if !packaging_failures.is_empty() {
            out.push_str("\nPackaging failures:\n");
            for (task, message) in packaging_failures {
                let _ = writeln!(out, "  {}  {}", task.record.label(), message);
            }
        }

        if !self.problems.is_empty() {
            out.push_str("\nRecipe problems:\n");
            for problem in &self.problems {
                let _ = writeln!(out, "  {}", problem.message);
            }
        }

        let _ = writeln!(
            out,
            "\nResult: {}",
            if self.is_success() { "success" } else { "FAILURE" }
        );
        out
    }

    /// Markdown table suitable for a pull request comment
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;
        let _ = writeln!(out, "## Build summary\n");
        let _ = writeln!(
            out,
            "| succeeded | up-to-date | failed | blocked | unbuildable | lint-excluded | cancelled |"
        );
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            c.succeeded, c.up_to_date, c.failed, c.blocked, c.unbuildable, c.lint_excluded, c.cancelled
        );

        let failures: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.record.cause.is_some())
            .collect();
        if !failures.is_empty() {
            let _ = writeln!(out, "\n| task | state | cause |");
            let _ = writeln!(out, "|---|---|---|");
            for task in failures {
                let cause = task
                    .record
                    .cause
                    .as_ref()
                    .map(|c| c.to_string().replace('|', "\\|"))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "| `{}` | {} | {} |",
                    task.record.label(),
                    task.record.state,
                    cause
                );
            }
        }

        if !self.problems.is_empty() {
            let _ = writeln!(out, "\n### Recipe problems\n");
            for problem in &self.problems {
                let _ = writeln!(out, "- {}", problem.message);
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?).map_err(|e| {
            Error::IoError(format!("Failed to write report {}: {}", path.display(), e))
        })
    }
}
