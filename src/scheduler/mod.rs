// src/scheduler/mod.rs

//! Build scheduling and execution
//!
//! The scheduler turns a classified [`BuildPlan`] into terminal task states.
//! A single coordinator owns the task table and the ready queue; a bounded
//! pool of scoped worker threads pulls jobs from a channel and reports back
//! on another. Because only the coordinator mutates state, every transition
//! is visible before dependents are re-evaluated.
//!
//! New work enters the ready queue only when a task reaches a terminal state
//! and its direct dependents are re-checked. A failed task blocks all of its
//! transitive dependents; unrelated branches keep building.
//!
//! Packaging a succeeded build happens on the same worker slot right after
//! the build, so the concurrency bound covers both.

mod task;

pub use task::{BuiltArtifact, Cause, PackagingStatus, TaskRecord, TaskState};

use crate::artifact::ArtifactKey;
use crate::classify::{BuildPlan, BuildState};
use crate::error::Result;
use crate::progress::{ProgressTracker, SilentProgress};
use crate::recipe::{Dependency, Platform, Recipe, RecipeId};
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// How often the coordinator checks for cancellation while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run-level cancellation flag shared with every job
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Everything a worker needs to build one task
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub recipe: Arc<Recipe>,
    pub platform: Platform,
    pub key: ArtifactKey,
    /// Stored artifacts of in-store build dependencies
    pub dependency_artifacts: Vec<ArtifactKey>,
    /// Build dependencies provided from outside the store
    pub external_deps: Vec<Dependency>,
}

impl BuildJob {
    pub fn label(&self) -> String {
        format!("{} [{}]", self.recipe.id, self.platform)
    }
}

/// How a build job ended
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded(BuiltArtifact),
    Failed(Cause),
    Cancelled,
}

/// Executes one build job
///
/// Implementations must tear down everything they created before returning
/// and should return promptly once `cancel` is set.
pub trait BuildExecutor: Send + Sync {
    fn build(&self, job: &BuildJob, cancel: &CancelToken) -> JobOutcome;
}

/// Post-build step run on the worker after a successful build
pub trait PostBuild: Send + Sync {
    /// Stage (and possibly upload) the artifact; returns the image reference
    fn package(&self, job: &BuildJob, artifact: &BuiltArtifact) -> Result<(String, bool)>;
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously running jobs
    pub jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl SchedulerConfig {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }
}

/// Terminal state of every task in a run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub tasks: Vec<TaskRecord>,
}

impl RunOutcome {
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    pub fn find(&self, name: &str) -> Vec<&TaskRecord> {
        self.tasks.iter().filter(|t| t.recipe.name == name).collect()
    }
}

enum WorkerEvent {
    /// Build finished; `packaging` is true when the worker moves on to packaging
    Finished {
        task: usize,
        outcome: JobOutcome,
        packaging: bool,
    },
    Packaged {
        task: usize,
        status: PackagingStatus,
    },
}

/// Drives a build plan to completion
pub struct Scheduler<'a> {
    config: SchedulerConfig,
    executor: &'a dyn BuildExecutor,
    post_build: Option<&'a dyn PostBuild>,
    progress: &'a dyn ProgressTracker,
    cancel: CancelToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        config: SchedulerConfig,
        executor: &'a dyn BuildExecutor,
        progress: &'a dyn ProgressTracker,
    ) -> Self {
        Self {
            config,
            executor,
            post_build: None,
            progress,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_post_build(mut self, post_build: &'a dyn PostBuild) -> Self {
        self.post_build = Some(post_build);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every task of `plan`
    ///
    /// `lint_excluded` maps recipe identities to the rule identifiers whose
    /// errors exclude them.
    pub fn run(&self, plan: &BuildPlan, lint_excluded: &HashMap<RecipeId, Vec<String>>) -> RunOutcome {
        let mut state = Coordinator::new(plan, self.progress);
        state.seed(lint_excluded);

        let jobs = self.config.jobs.max(1);
        info!(
            "Scheduling {} tasks ({} ready) on {} workers",
            plan.len(),
            state.ready.len(),
            jobs
        );

        let (job_tx, job_rx) = mpsc::channel::<(usize, BuildJob)>();
        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();
        let job_rx = Mutex::new(job_rx);

        std::thread::scope(|s| {
            for worker in 0..jobs {
                let events = event_tx.clone();
                let job_rx = &job_rx;
                let executor = self.executor;
                let post_build = self.post_build;
                let cancel = &self.cancel;
                s.spawn(move || {
                    loop {
                        let next = match job_rx.lock() {
                            Ok(rx) => rx.recv(),
                            Err(_) => break,
                        };
                        let Ok((task, job)) = next else { break };
                        debug!("Worker {} took {}", worker, job.label());
                        if !run_job(task, &job, executor, post_build, cancel, &events) {
                            break;
                        }
                    }
                });
            }
            drop(event_tx);

            let mut busy = 0usize;
            let mut cancel_seen = false;
            loop {
                if !cancel_seen && self.cancel.is_cancelled() {
                    cancel_seen = true;
                    warn!("Run cancelled; {} jobs still running", busy);
                    state.cancel_unstarted();
                }

                while busy < jobs && !cancel_seen {
                    let Some(task) = state.ready.pop_front() else { break };
                    let job = state.job(task);
                    if state.start(task) && job_tx.send((task, job)).is_ok() {
                        busy += 1;
                    }
                }

                if busy == 0 {
                    break;
                }

                match event_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(WorkerEvent::Finished {
                        task,
                        outcome,
                        packaging,
                    }) => {
                        if !packaging {
                            busy -= 1;
                        }
                        state.finish(task, outcome);
                    }
                    Ok(WorkerEvent::Packaged { task, status }) => {
                        busy -= 1;
                        state.tasks[task].packaging = Some(status);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        error!("All workers exited with {} jobs outstanding", busy);
                        break;
                    }
                }
            }

            drop(job_tx);
        });

        state.abandon_leftovers();
        RunOutcome { tasks: state.tasks }
    }
}

/// Initial task states for `plan` without running anything
///
/// Tasks left `ready` or `pending` are exactly those a real run would try to
/// build; exclusions and blocking already propagate through the plan.
pub fn preview(plan: &BuildPlan, lint_excluded: &HashMap<RecipeId, Vec<String>>) -> RunOutcome {
    let progress = SilentProgress::new();
    let mut state = Coordinator::new(plan, &progress);
    state.seed(lint_excluded);
    RunOutcome { tasks: state.tasks }
}

/// Build, then package, one job on the calling worker thread
///
/// Returns false once the coordinator has gone away.
fn run_job(
    task: usize,
    job: &BuildJob,
    executor: &dyn BuildExecutor,
    post_build: Option<&dyn PostBuild>,
    cancel: &CancelToken,
    events: &mpsc::Sender<WorkerEvent>,
) -> bool {
    let span = info_span!("task", recipe = %job.recipe.id, platform = %job.platform);
    let _enter = span.enter();

    let outcome = catch_unwind(AssertUnwindSafe(|| executor.build(job, cancel)))
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic in build runner".to_string());
            JobOutcome::Failed(Cause::RunnerCrashed { message })
        });

    let artifact = match (&outcome, post_build) {
        (JobOutcome::Succeeded(artifact), Some(_)) => Some(artifact.clone()),
        _ => None,
    };
    let packaging = artifact.is_some();
    if events
        .send(WorkerEvent::Finished {
            task,
            outcome,
            packaging,
        })
        .is_err()
    {
        return false;
    }

    if let (Some(artifact), Some(post_build)) = (artifact, post_build) {
        let status = match catch_unwind(AssertUnwindSafe(|| post_build.package(job, &artifact))) {
            Ok(Ok((image, uploaded))) => PackagingStatus::Staged { image, uploaded },
            Ok(Err(e)) => {
                warn!("Packaging {} failed: {}", job.label(), e);
                PackagingStatus::Failed {
                    message: e.to_string(),
                }
            }
            Err(_) => PackagingStatus::Failed {
                message: "panic in packager".to_string(),
            },
        };
        if events.send(WorkerEvent::Packaged { task, status }).is_err() {
            return false;
        }
    }
    true
}

/// Single-writer task table
struct Coordinator<'p> {
    plan: &'p BuildPlan,
    tasks: Vec<TaskRecord>,
    /// Build-time dependents of each task
    dependents: Vec<Vec<usize>>,
    /// Dependencies not yet in a success state
    unmet: Vec<usize>,
    ready: VecDeque<usize>,
    started: HashMap<usize, Instant>,
    progress: &'p dyn ProgressTracker,
}

impl<'p> Coordinator<'p> {
    fn new(plan: &'p BuildPlan, progress: &'p dyn ProgressTracker) -> Self {
        let mut dependents = vec![Vec::new(); plan.len()];
        for (idx, task) in plan.tasks.iter().enumerate() {
            for &dep in &task.deps {
                dependents[dep].push(idx);
            }
        }
        progress.set_length(plan.len() as u64);
        Self {
            plan,
            tasks: plan
                .tasks
                .iter()
                .map(|t| TaskRecord::new(t.recipe.id.clone(), t.platform))
                .collect(),
            dependents,
            unmet: plan.tasks.iter().map(|t| t.deps.len()).collect(),
            ready: VecDeque::new(),
            started: HashMap::new(),
            progress,
        }
    }

    fn set(&mut self, task: usize, next: TaskState, cause: Option<Cause>) -> bool {
        match self.tasks[task].transition(next, cause) {
            Ok(()) => {
                if next.is_terminal() {
                    self.progress.increment(1);
                    self.progress
                        .set_message(&format!("{} {}", self.tasks[task].label(), next));
                }
                true
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    /// Initial states from classification and lint, in plan order
    fn seed(&mut self, lint_excluded: &HashMap<RecipeId, Vec<String>>) {
        for idx in 0..self.plan.len() {
            let planned = &self.plan.tasks[idx];

            if let Some(rules) = lint_excluded.get(&planned.recipe.id) {
                let cause = Cause::Lint {
                    rules: rules.clone(),
                };
                self.set(idx, TaskState::LintExcluded, Some(cause));
                continue;
            }

            match &planned.state {
                BuildState::Unbuildable { root_cause } => {
                    let cause = Cause::UnresolvedDependency {
                        name: root_cause.clone(),
                    };
                    self.set(idx, TaskState::Unbuildable, Some(cause));
                    continue;
                }
                BuildState::UpToDate => {
                    self.set(idx, TaskState::UpToDate, None);
                    continue;
                }
                BuildState::Stale | BuildState::Missing => {}
            }

            // Dependencies come earlier in plan order, so their state is final here
            let mut blocked_by = None;
            let mut unmet = 0;
            for &dep in &planned.deps {
                let dep_state = self.tasks[dep].state;
                if dep_state.is_success() {
                    continue;
                }
                if dep_state.is_terminal() {
                    blocked_by.get_or_insert(dep);
                } else {
                    unmet += 1;
                }
            }
            self.unmet[idx] = unmet;

            if let Some(dep) = blocked_by {
                let cause = self.blocking_cause(dep);
                self.set(idx, TaskState::Blocked, Some(cause));
            } else if unmet == 0 {
                self.set(idx, TaskState::Ready, None);
                self.ready.push_back(idx);
            }
        }
    }

    /// Cause recorded on a dependent of `dep`, carrying the originating failure
    fn blocking_cause(&self, dep: usize) -> Cause {
        let record = &self.tasks[dep];
        match &record.cause {
            Some(Cause::Lint { rules }) => Cause::DependencyExcluded {
                dependency: record.label(),
                rules: rules.clone(),
            },
            Some(
                cause @ (Cause::DependencyFailed { .. } | Cause::DependencyExcluded { .. }),
            ) => cause.clone(),
            Some(cause) => Cause::DependencyFailed {
                dependency: record.label(),
                reason: cause.to_string(),
            },
            None => Cause::DependencyFailed {
                dependency: record.label(),
                reason: record.state.to_string(),
            },
        }
    }

    fn job(&self, task: usize) -> BuildJob {
        let planned = &self.plan.tasks[task];
        BuildJob {
            recipe: Arc::clone(&planned.recipe),
            platform: planned.platform,
            key: planned.key.clone(),
            dependency_artifacts: planned
                .deps
                .iter()
                .map(|&d| self.plan.tasks[d].key.clone())
                .collect(),
            external_deps: planned
                .recipe
                .build_deps
                .iter()
                .filter(|d| !planned.deps.iter().any(|&t| self.plan.tasks[t].recipe.name() == d.name))
                .cloned()
                .collect(),
        }
    }

    fn start(&mut self, task: usize) -> bool {
        if !self.set(task, TaskState::Running, None) {
            return false;
        }
        info!("Starting {}", self.tasks[task].label());
        self.started.insert(task, Instant::now());
        true
    }

    fn finish(&mut self, task: usize, outcome: JobOutcome) {
        self.tasks[task].duration = self.started.get(&task).map(Instant::elapsed);

        match outcome {
            JobOutcome::Succeeded(artifact) => {
                info!(
                    "Built {} ({})",
                    self.tasks[task].label(),
                    artifact.content_hash.short()
                );
                self.tasks[task].artifact = Some(artifact);
                if self.set(task, TaskState::Succeeded, None) {
                    self.promote_dependents(task);
                }
            }
            JobOutcome::Failed(cause) => {
                warn!("Failed {}: {}", self.tasks[task].label(), cause);
                if self.set(task, TaskState::Failed, Some(cause)) {
                    self.block_dependents(task);
                }
            }
            JobOutcome::Cancelled => {
                self.set(task, TaskState::Cancelled, Some(Cause::Cancelled));
            }
        }
    }

    fn promote_dependents(&mut self, task: usize) {
        for i in 0..self.dependents[task].len() {
            let dependent = self.dependents[task][i];
            if self.tasks[dependent].state != TaskState::Pending {
                continue;
            }
            self.unmet[dependent] = self.unmet[dependent].saturating_sub(1);
            if self.unmet[dependent] == 0 && self.set(dependent, TaskState::Ready, None) {
                self.ready.push_back(dependent);
            }
        }
    }

    /// Block every pending transitive dependent of a failed task
    fn block_dependents(&mut self, failed: usize) {
        let cause = self.blocking_cause(failed);
        let mut queue: VecDeque<usize> = self.dependents[failed].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if self.tasks[next].state != TaskState::Pending {
                continue;
            }
            debug!("Blocking {} ({})", self.tasks[next].label(), cause);
            if self.set(next, TaskState::Blocked, Some(cause.clone())) {
                queue.extend(self.dependents[next].iter().copied());
            }
        }
    }

    fn cancel_unstarted(&mut self) {
        self.ready.clear();
        for idx in 0..self.tasks.len() {
            if matches!(self.tasks[idx].state, TaskState::Pending | TaskState::Ready) {
                self.set(idx, TaskState::Cancelled, Some(Cause::Cancelled));
            }
        }
    }

    /// Tasks still non-terminal after the loop can only be left by a dead pool
    fn abandon_leftovers(&mut self) {
        for idx in 0..self.tasks.len() {
            let state = self.tasks[idx].state;
            if state.is_terminal() {
                continue;
            }
            let cause = Cause::RunnerCrashed {
                message: "worker pool exited before the task finished".to_string(),
            };
            if state == TaskState::Running {
                self.set(idx, TaskState::Failed, Some(cause));
            } else {
                self.set(idx, TaskState::Cancelled, Some(Cause::Cancelled));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::classify::ClassifyOptions;
    use crate::graph::{DependencyGraph, ResolutionPolicy};
    use crate::hash::hash_bytes;
    use crate::recipe::RecipeSnapshot;
    use crate::resolver::AssumeAvailable;
    use crate::test_support::recipe;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    /// Executor that records start/finish order and peak concurrency
    #[derive(Default)]
    struct Recording {
        fail: HashSet<String>,
        panic_on: HashSet<String>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        log: Mutex<Vec<(String, &'static str)>>,
    }

    impl Recording {
        fn events(&self) -> Vec<(String, &'static str)> {
            self.log.lock().unwrap().clone()
        }

        fn index(&self, name: &str, event: &str) -> usize {
            self.events()
                .iter()
                .position(|(n, e)| n == name && *e == event)
                .unwrap()
        }
    }

    impl BuildExecutor for Recording {
        fn build(&self, job: &BuildJob, cancel: &CancelToken) -> JobOutcome {
            let name = job.recipe.name().to_string();
            self.log.lock().unwrap().push((name.clone(), "start"));
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.panic_on.contains(&name) {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("runner blew up");
            }

            let deadline = Instant::now() + self.delay;
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    return JobOutcome::Cancelled;
                }
                std::thread::sleep(Duration::from_millis(5));
            }

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().unwrap().push((name.clone(), "end"));
            if self.fail.contains(&name) {
                JobOutcome::Failed(Cause::BuildFailure {
                    exit_code: Some(1),
                    log: None,
                })
            } else {
                JobOutcome::Succeeded(BuiltArtifact {
                    content_hash: hash_bytes(name.as_bytes()),
                    size: 0,
                    log: None,
                })
            }
        }
    }

    fn plan(recipes: Vec<Recipe>) -> BuildPlan {
        let snapshot = RecipeSnapshot::from_recipes("/recipes", recipes);
        let graph = DependencyGraph::build(&snapshot, &ResolutionPolicy::default()).unwrap();
        let options = ClassifyOptions {
            platforms: [Platform::Linux64].into_iter().collect(),
            ..Default::default()
        };
        BuildPlan::classify(&graph, &MemoryArtifactStore::new(), &AssumeAvailable, &options)
            .unwrap()
    }

    fn run(plan: &BuildPlan, executor: &Recording, jobs: usize) -> RunOutcome {
        let progress = SilentProgress::new();
        Scheduler::new(SchedulerConfig::default().with_jobs(jobs), executor, &progress)
            .run(plan, &HashMap::new())
    }

    fn state(outcome: &RunOutcome, name: &str) -> TaskState {
        outcome.find(name)[0].state
    }

    #[test]
    fn test_dependencies_finish_before_dependents_start() {
        let plan = plan(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
            recipe("c", "1.0", &["a"], &[]),
        ]);
        let executor = Recording {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let outcome = run(&plan, &executor, 2);

        for name in ["a", "b", "c"] {
            assert_eq!(state(&outcome, name), TaskState::Succeeded);
        }
        assert!(executor.index("a", "end") < executor.index("b", "start"));
        assert!(executor.index("a", "end") < executor.index("c", "start"));
    }

    #[test]
    fn test_concurrency_bound() {
        let recipes = (0..12)
            .map(|i| recipe(&format!("r{i}"), "1.0", &[], &[]))
            .collect();
        let plan = plan(recipes);
        let executor = Recording {
            delay: Duration::from_millis(15),
            ..Default::default()
        };
        let outcome = run(&plan, &executor, 3);
        assert_eq!(outcome.count(TaskState::Succeeded), 12);
        assert!(executor.peak.load(Ordering::SeqCst) <= 3);
        assert!(executor.peak.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_failure_blocks_dependents_only() {
        let plan = plan(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
            recipe("c", "1.0", &["b"], &[]),
            recipe("d", "1.0", &[], &[]),
        ]);
        let executor = Recording {
            fail: ["b".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let outcome = run(&plan, &executor, 2);

        assert_eq!(state(&outcome, "a"), TaskState::Succeeded);
        assert_eq!(state(&outcome, "b"), TaskState::Failed);
        assert_eq!(state(&outcome, "c"), TaskState::Blocked);
        assert_eq!(state(&outcome, "d"), TaskState::Succeeded);
        assert!(matches!(
            &outcome.find("c")[0].cause,
            Some(Cause::DependencyFailed { dependency, .. }) if dependency.starts_with("b-1.0-0")
        ));
        assert!(!executor.events().iter().any(|(n, _)| n == "c"));
    }

    #[test]
    fn test_runner_panic_is_contained() {
        let plan = plan(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
            recipe("d", "1.0", &[], &[]),
        ]);
        let executor = Recording {
            panic_on: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let outcome = run(&plan, &executor, 1);
        assert_eq!(state(&outcome, "a"), TaskState::Failed);
        assert!(matches!(
            outcome.find("a")[0].cause,
            Some(Cause::RunnerCrashed { .. })
        ));
        assert_eq!(state(&outcome, "b"), TaskState::Blocked);
        assert_eq!(state(&outcome, "d"), TaskState::Succeeded);
    }

    #[test]
    fn test_lint_exclusion_blocks_dependents() {
        let plan = plan(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
        ]);
        let executor = Recording::default();
        let progress = SilentProgress::new();
        let excluded: HashMap<RecipeId, Vec<String>> =
            [(RecipeId::new("a", "1.0", 0), vec!["missing_tests".to_string()])]
                .into_iter()
                .collect();
        let outcome = Scheduler::new(SchedulerConfig::default(), &executor, &progress)
            .run(&plan, &excluded);

        assert_eq!(state(&outcome, "a"), TaskState::LintExcluded);
        assert_eq!(state(&outcome, "b"), TaskState::Blocked);
        assert!(executor.events().is_empty());
        assert_eq!(progress.position(), 2);
    }

    #[test]
    fn test_cancellation_marks_unstarted() {
        let recipes = (0..6)
            .map(|i| recipe(&format!("r{i}"), "1.0", &[], &[]))
            .collect();
        let plan = plan(recipes);
        let executor = Recording {
            delay: Duration::from_secs(5),
            ..Default::default()
        };
        let progress = SilentProgress::new();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let outcome = std::thread::scope(|s| {
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                trigger.cancel();
            });
            Scheduler::new(SchedulerConfig::default().with_jobs(2), &executor, &progress)
                .with_cancel(cancel)
                .run(&plan, &HashMap::new())
        });

        assert_eq!(outcome.count(TaskState::Cancelled), 6);
        assert!(outcome.tasks.iter().all(|t| t.cause == Some(Cause::Cancelled)));
    }

    #[test]
    fn test_preview_runs_nothing() {
        let plan = plan(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
            recipe("c", "1.0", &["b"], &[]),
            recipe("d", "1.0", &[], &[]),
        ]);
        let excluded: HashMap<RecipeId, Vec<String>> =
            [(RecipeId::new("a", "1.0", 0), vec!["invalid_name".to_string()])]
                .into_iter()
                .collect();
        let outcome = preview(&plan, &excluded);

        assert_eq!(state(&outcome, "a"), TaskState::LintExcluded);
        assert_eq!(state(&outcome, "b"), TaskState::Blocked);
        assert_eq!(state(&outcome, "c"), TaskState::Blocked);
        assert_eq!(state(&outcome, "d"), TaskState::Ready);
        assert!(matches!(
            &outcome.find("c")[0].cause,
            Some(Cause::DependencyExcluded { dependency, .. }) if dependency.starts_with("a-1.0-0")
        ));
    }

    struct FailingPackager;

    impl PostBuild for FailingPackager {
        fn package(&self, _job: &BuildJob, _artifact: &BuiltArtifact) -> Result<(String, bool)> {
            Err(crate::Error::PackagingError("registry unreachable".to_string()))
        }
    }

    #[test]
    fn test_packaging_failure_keeps_build_success() {
        let plan = plan(vec![
            recipe("a", "1.0", &[], &[]),
            recipe("b", "1.0", &["a"], &[]),
        ]);
        let executor = Recording::default();
        let progress = SilentProgress::new();
        let outcome = Scheduler::new(SchedulerConfig::default(), &executor, &progress)
            .with_post_build(&FailingPackager)
            .run(&plan, &HashMap::new());

        assert_eq!(state(&outcome, "a"), TaskState::Succeeded);
        assert_eq!(state(&outcome, "b"), TaskState::Succeeded);
        assert!(matches!(
            outcome.find("a")[0].packaging,
            Some(PackagingStatus::Failed { .. })
        ));
    }
}
