//! Category tasks: enumerate, filter, transform and write.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_transform::{
    FileFailure, FontTransform, HtmlTransform, ImageTransform, OutputFile, ScriptTransform,
    StyleTransform, Transform, TransformContext,
};

use crate::error::PipelineError;
use crate::paths::{Category, PathTable};

/// Output settings shared by every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSettings {
    pub minify: bool,
    pub source_maps: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            minify: true,
            source_maps: true,
        }
    }
}

/// Outcome of one category run.
#[derive(Debug)]
pub struct TaskReport {
    pub category: Category,

    /// Files written, relative to the category's destination
    pub written: Vec<PathBuf>,

    /// Sources skipped because their output was up to date
    pub skipped: usize,

    /// Sources the transform rejected
    pub failures: Vec<FileFailure>,

    pub duration: Duration,
}

impl TaskReport {
    fn empty(category: Category) -> Self {
        Self {
            category,
            written: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Category to transform mapping.
pub struct TransformRegistry {
    transforms: HashMap<Category, Box<dyn Transform>>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Every category with its default transform.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry
            .register(Category::Style, StyleTransform::default())
            .register(Category::Html, HtmlTransform::default())
            .register(Category::Scripts, ScriptTransform::default())
            .register(Category::Images, ImageTransform::default())
            .register(Category::Font, FontTransform);
        registry
    }

    /// Register (or replace) the transform of a category.
    pub fn register(&mut self, category: Category, transform: impl Transform + 'static) -> &mut Self {
        self.transforms.insert(category, Box::new(transform));
        self
    }

    pub fn get(&self, category: Category) -> Option<&dyn Transform> {
        self.transforms.get(&category).map(|t| t.as_ref())
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Whether `dest` is missing or older than `src`.
pub fn is_newer(src: &Path, dest: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified());
    match (modified(src), modified(dest)) {
        (Ok(src), Ok(dest)) => src > dest,
        // An unreadable source is left for the transform to report.
        _ => true,
    }
}

/// Run one category to completion.
///
/// Per-file transform failures are logged and reported; only write failures
/// (and a missing transform) are errors.
pub fn run_category(
    table: &PathTable,
    category: Category,
    registry: &TransformRegistry,
    settings: TaskSettings,
) -> Result<TaskReport, PipelineError> {
    let start = Instant::now();
    let transform = registry
        .get(category)
        .ok_or(PipelineError::MissingTransform(category))?;
    let dest_dir = table.dest_dir(category);

    let mut report = TaskReport::empty(category);
    let mut sources = table.enumerate(category);

    if category.is_incremental() {
        let total = sources.len();
        sources.retain(|source| {
            let fresh = is_newer(&source.path, &dest_dir.join(transform.primary_output(source)));
            if !fresh {
                tracing::debug!("Up to date: {}", source.relative.display());
            }
            fresh
        });
        report.skipped = total - sources.len();
    }

    if sources.is_empty() {
        tracing::info!("{}: nothing to do ({} up to date)", category, report.skipped);
        report.duration = start.elapsed();
        return Ok(report);
    }

    tracing::info!("{}: processing {} file(s)", category, sources.len());

    let ctx = TransformContext {
        dest_dir: dest_dir.clone(),
        source_root: table.source_root(category),
        minify: settings.minify,
        source_maps: settings.source_maps,
    };
    let output = transform.run(&sources, &ctx);

    for failure in &output.failures {
        tracing::error!("{}: {}: {}", category, failure.path.display(), failure.error);
    }

    for file in &output.files {
        write_output(&dest_dir, file)?;
        report.written.push(file.relative.clone());
    }

    report.failures = output.failures;
    report.duration = start.elapsed();

    tracing::info!(
        "{}: {} written, {} skipped, {} failed in {}ms",
        category,
        report.written.len(),
        report.skipped,
        report.failures.len(),
        report.duration.as_millis()
    );

    Ok(report)
}

fn write_output(dest_dir: &Path, file: &OutputFile) -> Result<(), PipelineError> {
    let path = dest_dir.join(&file.relative);
    let write_err = |source| PipelineError::Write {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(&path, &file.contents).map_err(write_err)?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

/// Runs category tasks on behalf of the scheduler and the watch loop.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, category: Category) -> impl Future<Output = Result<TaskReport, PipelineError>> + Send;
}

/// Runs categories against the real filesystem.
#[derive(Clone)]
pub struct PipelineRunner {
    table: Arc<PathTable>,
    registry: Arc<TransformRegistry>,
    settings: TaskSettings,
}

impl PipelineRunner {
    pub fn new(table: Arc<PathTable>, registry: TransformRegistry, settings: TaskSettings) -> Self {
        Self {
            table,
            registry: Arc::new(registry),
            settings,
        }
    }

    pub fn table(&self) -> &Arc<PathTable> {
        &self.table
    }
}

impl TaskRunner for PipelineRunner {
    async fn run(&self, category: Category) -> Result<TaskReport, PipelineError> {
        let table = Arc::clone(&self.table);
        let registry = Arc::clone(&self.registry);
        let settings = self.settings;

        // Transforms are CPU bound and use rayon internally.
        tokio::task::spawn_blocking(move || run_category(&table, category, &registry, settings))
            .await
            .map_err(|e| PipelineError::Join {
                task: category.to_string(),
                message: e.to_string(),
            })?
    }
}
