//! One-shot tasks: clean or a single category.

use anyhow::{Context, Result};
use kiln_pipeline::Task;

use super::Project;

/// Run a single task.
pub async fn run(project: Project, task: Task) -> Result<()> {
    let report = project
        .orchestrator
        .run_task(task)
        .await
        .with_context(|| format!("{task:?} failed"))?;

    if let Some(report) = report {
        if !report.failures.is_empty() {
            tracing::warn!("{}: {} file(s) failed", report.category, report.failures.len());
        }
    }
    Ok(())
}
