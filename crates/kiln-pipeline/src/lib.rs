//! Build pipeline for kiln.
//!
//! Resolves the path table, runs category tasks through a dependency graph
//! (clean, then html, then every other asset category) and hands off to a
//! watch loop that rebuilds what changed and notifies the dev server.

pub mod clean;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod paths;
pub mod task;
pub mod watch;

pub use clean::{clean, CleanReport, DEFAULT_KEEP};
pub use error::PipelineError;
pub use graph::{execute, GraphError, Step, TaskGraph};
pub use orchestrator::{BuildMode, BuildState, BuildSummary, Orchestrator, Task};
pub use paths::{Category, PathEntry, PathOverride, PathTable};
pub use task::{is_newer, run_category, PipelineRunner, TaskReport, TaskRunner, TaskSettings, TransformRegistry};
pub use watch::{WatchLoop, WatchSummary, DEBOUNCE};
