//! Watch and serve without an initial build.

use anyhow::Result;

use super::Project;

/// Run the watch command.
pub async fn run(mut project: Project) -> Result<()> {
    tracing::info!("Starting development server on port {}", project.server.port);
    let server = project.server.clone();
    project.orchestrator.watch(Some(server)).await?;
    Ok(())
}
