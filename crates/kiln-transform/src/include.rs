//! `@@include` directive resolution.
//!
//! Syntax:
//!
//! ```text
//! @@include('partials/header.html')
//! @@include("partials/card.html", {"title": "Hello"})
//! ```
//!
//! Paths are relative to the directory of the file containing the
//! directive. The optional JSON object defines variables that are
//! substituted as `@@name` inside the included file and everything it
//! includes in turn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::traits::TransformError;

/// Maximum nesting of includes.
pub const MAX_INCLUDE_DEPTH: usize = 32;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@@include\(\s*(?:'([^']+)'|"([^"]+)")\s*(?:,\s*(\{(?s:.*?)\}))?\s*\)"#)
        .expect("Invalid include regex")
});

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@@([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid variable regex"));

type Vars = HashMap<String, String>;

/// Resolves include directives recursively.
#[derive(Debug, Clone)]
pub struct IncludeResolver {
    max_depth: usize,
}

impl Default for IncludeResolver {
    fn default() -> Self {
        Self {
            max_depth: MAX_INCLUDE_DEPTH,
        }
    }
}

impl IncludeResolver {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Read `path` and expand every include it contains.
    pub fn resolve_file(&self, path: &Path) -> Result<String, TransformError> {
        let text = std::fs::read_to_string(path).map_err(|source| TransformError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut stack = vec![identity(path)];
        self.expand(&text, path, &mut stack, &Vars::new())
    }

    /// Expand includes in `text`, which was read from `origin`.
    pub fn resolve_str(&self, text: &str, origin: &Path) -> Result<String, TransformError> {
        let mut stack = vec![identity(origin)];
        self.expand(text, origin, &mut stack, &Vars::new())
    }

    fn expand(
        &self,
        text: &str,
        origin: &Path,
        stack: &mut Vec<PathBuf>,
        vars: &Vars,
    ) -> Result<String, TransformError> {
        let base = origin.parent().unwrap_or(Path::new(""));
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in INCLUDE_RE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let target = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let path = base.join(target);

            let mut scoped = vars.clone();
            if let Some(args) = caps.get(3) {
                scoped.extend(parse_args(args.as_str(), origin)?);
            }

            out.push_str(&self.include(&path, stack, &scoped)?);
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn include(&self, path: &Path, stack: &mut Vec<PathBuf>, vars: &Vars) -> Result<String, TransformError> {
        let id = identity(path);
        if stack.contains(&id) {
            let mut chain = stack.clone();
            chain.push(id);
            return Err(TransformError::IncludeCycle { chain });
        }
        if stack.len() > self.max_depth {
            return Err(TransformError::IncludeDepth {
                path: path.to_path_buf(),
                limit: self.max_depth,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|source| TransformError::Include {
            path: path.to_path_buf(),
            source,
        })?;
        let text = substitute(&raw, vars);

        stack.push(id);
        let expanded = self.expand(&text, path, stack, vars);
        stack.pop();
        expanded
    }
}

/// Canonical path when it exists, so `a/../b.html` and `b.html` match.
fn identity(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn parse_args(raw: &str, origin: &Path) -> Result<Vars, TransformError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| TransformError::IncludeArgs {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;
    let Value::Object(map) = value else {
        return Err(TransformError::IncludeArgs {
            path: origin.to_path_buf(),
            message: "expected a JSON object".to_string(),
        });
    };

    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// Replace `@@name` with known variables; unknown names are left untouched.
fn substitute(text: &str, vars: &Vars) -> String {
    if vars.is_empty() {
        return text.to_string();
    }
    VAR_RE
        .replace_all(text, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
