pub mod build;
pub mod task;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use kiln_pipeline::{Orchestrator, PipelineRunner};
use kiln_server::DevServerConfig;

use crate::config::load_config;

/// Options shared by every command.
pub struct Options<'a> {
    pub root: &'a Path,
    pub config: Option<&'a Path>,
    pub port: Option<u16>,
    pub open: bool,
}

/// A configured project: its orchestrator plus dev server settings.
pub struct Project {
    pub orchestrator: Orchestrator<PipelineRunner>,
    pub server: DevServerConfig,
}

impl Project {
    pub fn load(options: &Options<'_>) -> Result<Self> {
        let config = load_config(options.root, options.config)?;
        let table = config.path_table(options.root);

        let mut server = config.server(&table);
        if let Some(port) = options.port {
            server.port = port;
        }
        server.open = server.open && options.open;

        let runner = PipelineRunner::new(Arc::clone(&table), config.registry(), config.settings());
        let orchestrator = Orchestrator::new(table, Arc::new(runner), config.clean.keep.clone());

        Ok(Self { orchestrator, server })
    }
}
