//! Kiln CLI - static asset build pipeline with live reload.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use kiln_pipeline::{Category, Task};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

use commands::{Options, Project};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Static asset build pipeline with live reload")]
#[command(version)]
pub struct Cli {
    /// Task to run
    #[arg(value_enum, default_value_t = TaskArg::Build)]
    task: TaskArg,

    /// Path to pipeline.toml config file (defaults to <root>/pipeline.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Port for the development server
    #[arg(long)]
    port: Option<u16>,

    /// Do not open browser
    #[arg(long)]
    no_open: bool,

    /// Build once and exit instead of watching
    #[arg(long)]
    once: bool,

    /// Project root
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TaskArg {
    /// Remove previous output (except kept entries)
    Clean,
    /// Build HTML pages
    Html,
    /// Compile stylesheets
    Styles,
    /// Bundle scripts
    Scripts,
    /// Optimize images
    #[value(alias = "img")]
    Images,
    /// Convert fonts
    Fonts,
    /// Serve and rebuild on change, without an initial build
    Watch,
    /// Clean, build everything, then watch
    Build,
}

impl TaskArg {
    fn one_shot(self) -> Option<Task> {
        match self {
            TaskArg::Clean => Some(Task::Clean),
            TaskArg::Html => Some(Task::Run(Category::Html)),
            TaskArg::Styles => Some(Task::Run(Category::Style)),
            TaskArg::Scripts => Some(Task::Run(Category::Scripts)),
            TaskArg::Images => Some(Task::Run(Category::Images)),
            TaskArg::Fonts => Some(Task::Run(Category::Font)),
            TaskArg::Watch | TaskArg::Build => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (RUST_LOG wins over the verbosity flag)
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();

    let options = Options {
        root: &cli.root,
        config: cli.config.as_deref(),
        port: cli.port,
        open: !cli.no_open,
    };
    let project = Project::load(&options)?;

    match (cli.task, cli.task.one_shot()) {
        (_, Some(task)) => commands::task::run(project, task).await?,
        (TaskArg::Watch, None) => commands::watch::run(project).await?,
        (_, None) => commands::build::run(project, cli.once).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_build() {
        let cli = Cli::parse_from(["kiln"]);
        assert_eq!(cli.task, TaskArg::Build);
        assert!(!cli.once);
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn accepts_img_alias() {
        let cli = Cli::parse_from(["kiln", "img"]);
        assert_eq!(cli.task.one_shot(), Some(Task::Run(Category::Images)));
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from(["kiln", "build", "--once", "--port", "8080", "--no-open", "-v"]);
        assert!(cli.once);
        assert_eq!(cli.port, Some(8080));
        assert!(cli.no_open);
        assert!(cli.verbose);
    }

    #[test]
    fn rejects_unknown_tasks() {
        assert!(Cli::try_parse_from(["kiln", "deploy"]).is_err());
    }

    #[test]
    fn one_shot_build_writes_output() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("src/html")).unwrap();
        std::fs::write(temp.path().join("src/html/index.html"), "<p>hi</p>").unwrap();

        let options = Options {
            root: temp.path(),
            config: None,
            port: None,
            open: false,
        };
        let project = Project::load(&options).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(commands::build::run(project, true)).unwrap();

        assert!(temp.path().join("dist/index.html").exists());
    }
}
