//! Errors that abort a pipeline run.

use std::path::PathBuf;

use kiln_server::ServerError;

use crate::graph::GraphError;
use crate::orchestrator::BuildState;
use crate::paths::Category;

/// Hard pipeline errors.
///
/// Per-file transform problems are not errors at this level; they are
/// reported in [`TaskReport::failures`](crate::task::TaskReport).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to clean {path}: {source}")]
    Clean {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Invalid build state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: BuildState, to: BuildState },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("Unknown task '{0}'")]
    UnknownCategory(String),

    #[error("No transform registered for {0}")]
    MissingTransform(Category),

    #[error("Task {task} did not complete: {message}")]
    Join { task: String, message: String },
}
