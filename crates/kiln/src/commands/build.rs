//! Full build: clean, generate everything, then watch.

use anyhow::Result;
use kiln_pipeline::BuildMode;

use super::Project;

/// Run the build command.
pub async fn run(mut project: Project, once: bool) -> Result<()> {
    let mode = if once {
        BuildMode::Once
    } else {
        BuildMode::Watch(Some(project.server.clone()))
    };

    let summary = project.orchestrator.build(mode).await?;

    for report in &summary.reports {
        tracing::debug!(
            "{}: {} written, {} skipped, {} failed",
            report.category,
            report.written.len(),
            report.skipped,
            report.failures.len()
        );
    }
    if summary.failed() > 0 {
        tracing::warn!("{} file(s) failed to build", summary.failed());
    }

    Ok(())
}
