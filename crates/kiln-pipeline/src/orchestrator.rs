//! Build orchestration: clean, generate, then hand off to watching.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_server::{DevServerConfig, HmrHub};

use crate::clean::{clean, CleanReport};
use crate::error::PipelineError;
use crate::graph::{execute, Step, TaskGraph};
use crate::paths::{Category, PathTable};
use crate::task::{TaskReport, TaskRunner};
use crate::watch::{WatchLoop, WatchSummary};

/// Lifecycle of a build invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Cleaning,
    Generating,
    Watching,
    Stopped,
}

impl BuildState {
    pub fn can_advance(self, next: BuildState) -> bool {
        use BuildState::*;
        matches!(
            (self, next),
            (Idle, Cleaning)
                | (Cleaning, Generating)
                | (Generating, Watching)
                | (Generating, Stopped)
                // a standalone watch skips the initial build
                | (Idle, Watching)
                | (Watching, Stopped)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: BuildState) -> Result<(), PipelineError> {
        if !self.can_advance(next) {
            return Err(PipelineError::InvalidTransition { from: *self, to: next });
        }
        tracing::debug!("Build state {:?} -> {:?}", self, next);
        *self = next;
        Ok(())
    }
}

/// What happens after the initial build.
#[derive(Debug, Clone)]
pub enum BuildMode {
    /// Build and exit
    Once,

    /// Build, then watch; serve the output unless `None`
    Watch(Option<DevServerConfig>),
}

/// A one-shot task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Clean,
    Run(Category),
}

/// Result of a full build.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub cleaned: CleanReport,
    pub reports: Vec<TaskReport>,
    pub duration: Duration,
}

impl BuildSummary {
    pub fn written(&self) -> usize {
        self.reports.iter().map(|r| r.written.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().map(|r| r.failures.len()).sum()
    }
}

/// Outcome of one graph step.
enum StepOutcome {
    Cleaned(CleanReport),
    Generated(TaskReport),
}

/// Drives clean, generation and watching for one project.
pub struct Orchestrator<R> {
    table: Arc<PathTable>,
    runner: Arc<R>,
    keep: Vec<String>,
    hub: HmrHub,
    state: BuildState,
}

impl<R: TaskRunner> Orchestrator<R> {
    /// `keep` names entries of the output root the clean step leaves alone.
    pub fn new(table: Arc<PathTable>, runner: Arc<R>, keep: Vec<String>) -> Self {
        Self {
            table,
            runner,
            keep,
            hub: HmrHub::new(),
            state: BuildState::Idle,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn hub(&self) -> &HmrHub {
        &self.hub
    }

    /// Clean, generate every category, then watch unless `mode` is `Once`.
    pub async fn build(&mut self, mode: BuildMode) -> Result<BuildSummary, PipelineError> {
        let start = Instant::now();
        self.state.advance(BuildState::Cleaning)?;
        tracing::info!("Building {}", self.table.root().display());

        let graph = TaskGraph::standard();
        let dist_root = self.table.dist_root();
        let keep = self.keep.clone();
        let runner = Arc::clone(&self.runner);

        let run = |step: Step| {
            let dist_root = dist_root.clone();
            let keep = keep.clone();
            let runner = Arc::clone(&runner);
            async move { run_step(step, dist_root, keep, runner).await }
        };

        let state = &mut self.state;
        let outcome = execute(&graph, run, |wave: &[Step]| {
            if *state == BuildState::Cleaning && !wave.contains(&Step::Clean) {
                state.advance(BuildState::Generating)?;
            }
            Ok(())
        })
        .await;

        let outcomes = match outcome {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.state = BuildState::Stopped;
                return Err(e);
            }
        };

        let mut summary = BuildSummary::default();
        for (_, outcome) in outcomes {
            match outcome {
                StepOutcome::Cleaned(report) => summary.cleaned = report,
                StepOutcome::Generated(report) => summary.reports.push(report),
            }
        }
        summary.reports.sort_by_key(|r| r.category);
        summary.duration = start.elapsed();

        tracing::info!(
            "Build finished: {} file(s) written, {} failed in {}ms",
            summary.written(),
            summary.failed(),
            summary.duration.as_millis()
        );

        match mode {
            BuildMode::Once => self.state.advance(BuildState::Stopped)?,
            BuildMode::Watch(server) => {
                self.state.advance(BuildState::Watching)?;
                let result = self.watch_loop().run(server).await;
                self.state.advance(BuildState::Stopped)?;
                result?;
            }
        }

        Ok(summary)
    }

    /// Watch without an initial build.
    pub async fn watch(&mut self, server: Option<DevServerConfig>) -> Result<WatchSummary, PipelineError> {
        self.state.advance(BuildState::Watching)?;
        let result = self.watch_loop().run(server).await;
        self.state.advance(BuildState::Stopped)?;
        result
    }

    /// Run a single task and return.
    pub async fn run_task(&self, task: Task) -> Result<Option<TaskReport>, PipelineError> {
        match task {
            Task::Clean => {
                let dist_root = self.table.dist_root();
                let keep = self.keep.clone();
                spawn_clean(dist_root, keep).await?;
                Ok(None)
            }
            Task::Run(category) => self.runner.run(category).await.map(Some),
        }
    }

    fn watch_loop(&self) -> WatchLoop<R> {
        WatchLoop::new(Arc::clone(&self.table), Arc::clone(&self.runner), self.hub.clone())
    }
}

async fn run_step<R: TaskRunner>(
    step: Step,
    dist_root: PathBuf,
    keep: Vec<String>,
    runner: Arc<R>,
) -> Result<StepOutcome, PipelineError> {
    match step {
        Step::Clean => spawn_clean(dist_root, keep).await.map(StepOutcome::Cleaned),
        Step::Generate(category) => runner.run(category).await.map(StepOutcome::Generated),
    }
}

async fn spawn_clean(dist_root: PathBuf, keep: Vec<String>) -> Result<CleanReport, PipelineError> {
    tokio::task::spawn_blocking(move || clean(&dist_root, &keep))
        .await
        .map_err(|e| PipelineError::Join {
            task: "clean".to_string(),
            message: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records runs and fails the categories it is told to.
    #[derive(Default)]
    struct RecordingRunner {
        runs: Mutex<Vec<Category>>,
        fail: Vec<Category>,
    }

    impl TaskRunner for RecordingRunner {
        async fn run(&self, category: Category) -> Result<TaskReport, PipelineError> {
            self.runs.lock().unwrap().push(category);
            if self.fail.contains(&category) {
                return Err(PipelineError::Write {
                    path: PathBuf::from(category.name()),
                    source: std::io::Error::other("disk full"),
                });
            }
            Ok(TaskReport {
                category,
                written: vec![PathBuf::from(format!("{}.out", category.name()))],
                skipped: 0,
                failures: Vec::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn orchestrator(root: &std::path::Path, runner: Arc<RecordingRunner>) -> Orchestrator<RecordingRunner> {
        let table = Arc::new(PathTable::new(root));
        Orchestrator::new(table, runner, vec!["img".to_string()])
    }

    #[test]
    fn lifecycle_rejects_illegal_transitions() {
        let mut state = BuildState::Idle;
        let err = state.advance(BuildState::Generating).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: BuildState::Idle,
                to: BuildState::Generating
            }
        ));
        assert_eq!(state, BuildState::Idle);

        state.advance(BuildState::Cleaning).unwrap();
        state.advance(BuildState::Generating).unwrap();
        state.advance(BuildState::Watching).unwrap();
        assert!(state.advance(BuildState::Cleaning).is_err());
        state.advance(BuildState::Stopped).unwrap();
    }

    #[tokio::test]
    async fn one_shot_build_cleans_then_generates_html_first() {
        let temp = tempdir().unwrap();
        let dist = temp.path().join("dist");
        fs::create_dir_all(dist.join("img")).unwrap();
        fs::write(dist.join("stale.html"), "old").unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let mut orch = orchestrator(temp.path(), Arc::clone(&runner));
        let summary = orch.build(BuildMode::Once).await.unwrap();

        assert_eq!(orch.state(), BuildState::Stopped);
        assert!(!dist.join("stale.html").exists());
        assert!(dist.join("img").exists());
        assert_eq!(summary.reports.len(), 5);
        assert_eq!(summary.written(), 5);

        let runs = runner.runs.lock().unwrap();
        assert_eq!(runs[0], Category::Html);
        let mut rest = runs[1..].to_vec();
        rest.sort();
        assert_eq!(
            rest,
            vec![Category::Style, Category::Scripts, Category::Images, Category::Font]
        );
    }

    #[tokio::test]
    async fn failed_clean_prevents_generation() {
        let temp = tempdir().unwrap();
        // dist exists as a file, so it cannot be listed
        fs::write(temp.path().join("dist"), "").unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let mut orch = orchestrator(temp.path(), Arc::clone(&runner));
        let err = orch.build(BuildMode::Once).await.unwrap_err();

        assert!(matches!(err, PipelineError::Clean { .. }));
        assert!(runner.runs.lock().unwrap().is_empty());
        assert_eq!(orch.state(), BuildState::Stopped);
    }

    #[tokio::test]
    async fn hard_html_error_stops_later_waves() {
        let temp = tempdir().unwrap();
        let runner = Arc::new(RecordingRunner {
            fail: vec![Category::Html],
            ..Default::default()
        });
        let mut orch = orchestrator(temp.path(), Arc::clone(&runner));

        let err = orch.build(BuildMode::Once).await.unwrap_err();
        assert!(matches!(err, PipelineError::Write { .. }));
        assert_eq!(*runner.runs.lock().unwrap(), vec![Category::Html]);
    }

    #[tokio::test]
    async fn run_task_runs_only_that_category() {
        let temp = tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let orch = orchestrator(temp.path(), Arc::clone(&runner));

        let report = orch.run_task(Task::Run(Category::Images)).await.unwrap().unwrap();
        assert_eq!(report.category, Category::Images);
        assert_eq!(*runner.runs.lock().unwrap(), vec![Category::Images]);

        assert!(orch.run_task(Task::Clean).await.unwrap().is_none());
        assert_eq!(orch.state(), BuildState::Idle);
    }

    #[tokio::test]
    async fn watch_after_finished_build_is_rejected() {
        let temp = tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let mut orch = orchestrator(temp.path(), Arc::clone(&runner));
        orch.build(BuildMode::Once).await.unwrap();

        let err = orch.watch(None).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: BuildState::Stopped,
                to: BuildState::Watching
            }
        ));
        assert_eq!(orch.state(), BuildState::Stopped);
    }
}
