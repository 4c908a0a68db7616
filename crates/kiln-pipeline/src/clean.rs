//! Removal of previous build output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Entries kept by default (optimized images are expensive to regenerate).
pub const DEFAULT_KEEP: &[&str] = &["img"];

/// What a clean removed and what it left in place.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
}

/// Delete every entry directly under `dest_root` whose name is not in `keep`.
///
/// A missing `dest_root` is not an error.
pub fn clean(dest_root: &Path, keep: &[String]) -> Result<CleanReport, PipelineError> {
    let mut report = CleanReport::default();

    let entries = match fs::read_dir(dest_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("Nothing to clean at {}", dest_root.display());
            return Ok(report);
        }
        Err(source) => {
            return Err(PipelineError::Clean {
                path: dest_root.to_path_buf(),
                source,
            })
        }
    };

    let fail = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PipelineError::Clean { path, source }
    };

    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(fail(dest_root))?.path());
    }
    paths.sort();

    for path in paths {
        let kept = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| keep.iter().any(|k| k == name));
        if kept {
            report.kept.push(path);
            continue;
        }

        // symlink_metadata: a link to a directory is removed, not followed
        let meta = fs::symlink_metadata(&path).map_err(fail(&path))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).map_err(fail(&path))?;
        } else {
            fs::remove_file(&path).map_err(fail(&path))?;
        }
        tracing::debug!("Removed {}", path.display());
        report.removed.push(path);
    }

    tracing::info!(
        "Cleaned {}: {} removed, {} kept",
        dest_root.display(),
        report.removed.len(),
        report.kept.len()
    );
    Ok(report)
}
