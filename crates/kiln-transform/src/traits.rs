//! Trait definitions for transform collaborators.

use std::path::{Path, PathBuf};

/// A source file matched by a category glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,

    /// Path relative to the glob base (e.g. "icons/logo.png")
    pub relative: PathBuf,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, relative: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            relative: relative.into(),
        }
    }

    /// File extension, lowercased.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Context shared by every transform invocation.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Destination directory of the category
    pub dest_dir: PathBuf,

    /// Root the category's sources live under (used as a load path)
    pub source_root: PathBuf,

    /// Minify output
    pub minify: bool,

    /// Emit source maps next to bundles
    pub source_maps: bool,
}

impl Default for TransformContext {
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::from("dist"),
            source_root: PathBuf::from("src"),
            minify: true,
            source_maps: true,
        }
    }
}

/// A file produced by a transform, relative to the destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub relative: PathBuf,
    pub contents: Vec<u8>,
}

impl OutputFile {
    pub fn new(relative: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            relative: relative.into(),
            contents: contents.into(),
        }
    }
}

/// A source that could not be transformed.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: TransformError,
}

impl FileFailure {
    pub fn new(path: &Path, error: TransformError) -> Self {
        Self {
            path: path.to_path_buf(),
            error,
        }
    }
}

/// Everything a transform produced in one run.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub files: Vec<OutputFile>,
    pub failures: Vec<FileFailure>,
}

impl TransformOutput {
    pub fn push_file(&mut self, file: OutputFile) {
        self.files.push(file);
    }

    pub fn push_failure(&mut self, path: &Path, error: TransformError) {
        self.failures.push(FileFailure::new(path, error));
    }
}

/// Errors that can occur during transformation.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Minify error: {0}")]
    Minify(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Font error: {0}")]
    Font(String),

    #[error("Failed to include {path}: {source}")]
    Include {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Include cycle: {}", format_chain(.chain))]
    IncludeCycle { chain: Vec<PathBuf> },

    #[error("Include depth exceeds {limit} at {path}")]
    IncludeDepth { path: PathBuf, limit: usize },

    #[error("Invalid include arguments in {path}: {message}")]
    IncludeArgs { path: PathBuf, message: String },
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Read a source file, mapping the IO error to a transform error.
pub(crate) fn read_source(path: &Path) -> Result<Vec<u8>, TransformError> {
    std::fs::read(path).map_err(|source| TransformError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a source file as UTF-8 text.
pub(crate) fn read_source_text(path: &Path) -> Result<String, TransformError> {
    std::fs::read_to_string(path).map_err(|source| TransformError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Trait for category transform collaborators.
///
/// A collaborator turns a set of matched sources into output files. It must
/// not fail as a whole because of one bad input: malformed sources are
/// reported in [`TransformOutput::failures`] and the rest are still processed.
pub trait Transform: Send + Sync {
    /// Collaborator identifier (e.g., "styles", "images")
    fn name(&self) -> &'static str;

    /// Transform the given sources.
    fn run(&self, inputs: &[SourceFile], ctx: &TransformContext) -> TransformOutput;

    /// Path of the primary output for a source, relative to the destination.
    ///
    /// Used by the incremental filter to decide whether a source is stale.
    fn primary_output(&self, source: &SourceFile) -> PathBuf {
        source.relative.clone()
    }
}
