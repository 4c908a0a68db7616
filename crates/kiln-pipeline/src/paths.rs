//! Asset categories and the table of their source globs and destinations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use walkdir::WalkDir;

use kiln_transform::SourceFile;

use crate::error::PipelineError;

/// An asset category. Each category has one transform task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Style,
    Html,
    Scripts,
    Images,
    Font,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Style,
        Category::Html,
        Category::Scripts,
        Category::Images,
        Category::Font,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Style => "style",
            Category::Html => "html",
            Category::Scripts => "scripts",
            Category::Images => "images",
            Category::Font => "font",
        }
    }

    /// Categories whose expensive transforms skip up-to-date outputs.
    pub fn is_incremental(self) -> bool {
        matches!(self, Category::Images | Category::Font)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "style" | "styles" | "css" => Ok(Category::Style),
            "html" => Ok(Category::Html),
            "scripts" | "script" | "js" => Ok(Category::Scripts),
            "images" | "image" | "img" => Ok(Category::Images),
            "font" | "fonts" => Ok(Category::Font),
            other => Err(PipelineError::UnknownCategory(other.to_string())),
        }
    }
}

/// Configuration override for one category. Missing fields keep defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathOverride {
    #[serde(default)]
    pub src: Option<Vec<String>>,
    #[serde(default)]
    pub watch: Option<Vec<String>>,
    #[serde(default)]
    pub dest: Option<PathBuf>,
}

/// Source globs and destination of one category.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub category: Category,

    /// Globs selecting the sources to transform, relative to the project root
    pub sources: Vec<String>,

    /// Globs whose changes trigger a rebuild
    pub watch: Vec<String>,

    /// Destination directory, relative to the project root
    pub dest: PathBuf,

    source_set: Option<GlobSet>,
    watch_set: Option<GlobSet>,
}

impl PathEntry {
    fn new(category: Category, sources: Vec<String>, watch: Vec<String>, dest: PathBuf) -> Self {
        let source_set = compile_globs(category, &sources);
        let watch_set = compile_globs(category, &watch);
        Self {
            category,
            sources,
            watch,
            dest,
            source_set,
            watch_set,
        }
    }

    fn defaults(category: Category) -> Self {
        let (sources, watch, dest): (&[&str], &[&str], &str) = match category {
            Category::Style => (&["src/scss/**/*.scss"], &["src/scss/**/*.scss"], "dist/css"),
            Category::Html => (&["src/html/*.html"], &["src/html/**/*.html"], "dist"),
            Category::Scripts => (&["src/js/**/*.js"], &["src/js/**/*.js"], "dist/js"),
            Category::Images => (
                &["src/img/**/*.{jpeg,jpg,webp,png,svg}"],
                &["src/img/**/*.{jpeg,jpg,webp,png,svg}"],
                "dist/img",
            ),
            Category::Font => (
                &["src/font/*.{eot,ttf,otf,otc,ttc,woff,woff2,svg}"],
                &["src/font/**/*.{eot,ttf,otf,otc,ttc,woff,woff2,svg}"],
                "dist/font",
            ),
        };
        let owned = |globs: &[&str]| globs.iter().map(|g| g.to_string()).collect::<Vec<_>>();
        Self::new(category, owned(sources), owned(watch), PathBuf::from(dest))
    }

    fn with_override(self, o: &PathOverride) -> Self {
        let sources = o.src.clone().unwrap_or(self.sources);
        // Watching follows the sources unless set explicitly.
        let watch = match (&o.watch, &o.src) {
            (Some(w), _) => w.clone(),
            (None, Some(src)) => src.clone(),
            (None, None) => self.watch,
        };
        let dest = o.dest.clone().unwrap_or(self.dest);
        Self::new(self.category, sources, watch, dest)
    }
}

/// Compile globs; a malformed glob disables the category with a warning.
fn compile_globs(category: Category, globs: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                tracing::warn!("Invalid {} glob '{}': {}; category disabled", category, pattern, e);
                return None;
            }
        }
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(e) => {
            tracing::warn!("Invalid {} globs: {}; category disabled", category, e);
            None
        }
    }
}

/// Literal directory prefix of a glob ("src/scss/**/*.scss" -> "src/scss").
pub fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for part in pattern.split('/') {
        if part.contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(part);
    }
    // A pattern without wildcards names a file; its base is the parent.
    if base.as_os_str().len() == pattern.trim_end_matches('/').len() {
        base.pop();
    }
    base
}

/// Immutable table of every category's paths, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PathTable {
    root: PathBuf,
    dist: PathBuf,
    entries: Vec<PathEntry>,
}

impl PathTable {
    /// Default layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_overrides(root, PathBuf::from("dist"), &BTreeMap::new())
    }

    /// Layout rooted at `root` with per-category overrides keyed by category name.
    pub fn with_overrides(
        root: impl Into<PathBuf>,
        dist: PathBuf,
        overrides: &BTreeMap<String, PathOverride>,
    ) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);

        let mut entries: Vec<PathEntry> = Category::ALL.iter().map(|c| PathEntry::defaults(*c)).collect();
        for (name, o) in overrides {
            match name.parse::<Category>() {
                Ok(category) => {
                    let entry = entries[category.index()].clone();
                    entries[category.index()] = entry.with_override(o);
                }
                Err(_) => tracing::warn!("Ignoring paths for unknown category '{}'", name),
            }
        }

        Self { root, dist, entries }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root of the build output.
    pub fn dist_root(&self) -> PathBuf {
        self.root.join(&self.dist)
    }

    pub fn entry(&self, category: Category) -> &PathEntry {
        &self.entries[category.index()]
    }

    /// Absolute destination directory of a category.
    pub fn dest_dir(&self, category: Category) -> PathBuf {
        self.root.join(&self.entry(category).dest)
    }

    /// Directory the first source glob of a category is rooted at.
    pub fn source_root(&self, category: Category) -> PathBuf {
        let base = self
            .entry(category)
            .sources
            .first()
            .map(|g| glob_base(g))
            .unwrap_or_default();
        self.root.join(base)
    }

    /// Directories to subscribe to for change events.
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .entries
            .iter()
            .flat_map(|e| e.watch.iter().map(|g| self.root.join(glob_base(g))))
            .collect();
        dirs.sort();
        dirs.dedup();
        // Nested directories are covered by recursive watches on their parents.
        let mut roots: Vec<PathBuf> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !roots.iter().any(|r| dir.starts_with(r)) {
                roots.push(dir);
            }
        }
        roots
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Whether `path` is one of the category's sources.
    pub fn matches(&self, category: Category, path: &Path) -> bool {
        self.entry(category)
            .source_set
            .as_ref()
            .is_some_and(|set| set.is_match(self.relative(path)))
    }

    /// Categories whose watch globs match `path`.
    pub fn classify(&self, path: &Path) -> Vec<Category> {
        let relative = self.relative(path);
        self.entries
            .iter()
            .filter(|e| e.watch_set.as_ref().is_some_and(|set| set.is_match(relative)))
            .map(|e| e.category)
            .collect()
    }

    /// Every source of a category, sorted by path.
    ///
    /// A missing source directory yields no sources and a warning.
    pub fn enumerate(&self, category: Category) -> Vec<SourceFile> {
        let entry = self.entry(category);
        let Some(set) = entry.source_set.as_ref() else {
            return Vec::new();
        };

        let mut files = Vec::new();
        for pattern in &entry.sources {
            let base = self.root.join(glob_base(pattern));
            if !base.is_dir() {
                tracing::warn!("{} source directory not found: {}", category, base.display());
                continue;
            }

            for dir_entry in WalkDir::new(&base)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = dir_entry.path();
                if !dir_entry.file_type().is_file() || !set.is_match(self.relative(path)) {
                    continue;
                }
                let relative = path.strip_prefix(&base).unwrap_or(path).to_path_buf();
                files.push(SourceFile::new(path, relative));
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        files
    }

    /// Server URL path of a file written by a category.
    pub fn url_path(&self, category: Category, relative: &Path) -> String {
        let file = self.dest_dir(category).join(relative);
        let served = file.strip_prefix(self.dist_root()).unwrap_or(file.as_path());
        let parts: Vec<String> = served
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("/{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn parses_category_aliases() {
        assert_eq!("img".parse::<Category>().unwrap(), Category::Images);
        assert_eq!("styles".parse::<Category>().unwrap(), Category::Style);
        assert_eq!("fonts".parse::<Category>().unwrap(), Category::Font);
        assert!("video".parse::<Category>().is_err());
    }

    #[test]
    fn computes_glob_bases() {
        assert_eq!(glob_base("src/scss/**/*.scss"), PathBuf::from("src/scss"));
        assert_eq!(glob_base("src/html/*.html"), PathBuf::from("src/html"));
        assert_eq!(glob_base("src/img/**/*.{png,svg}"), PathBuf::from("src/img"));
        assert_eq!(glob_base("src/html/index.html"), PathBuf::from("src/html"));
    }

    #[test]
    fn default_table_matches_documented_layout() {
        let temp = tempdir().unwrap();
        let table = PathTable::new(temp.path());

        assert_eq!(table.dest_dir(Category::Style), table.root().join("dist/css"));
        assert_eq!(table.dest_dir(Category::Html), table.root().join("dist"));
        assert!(table.matches(Category::Images, &table.root().join("src/img/a/b.png")));
        assert!(!table.matches(Category::Images, &table.root().join("src/img/b.gif")));
        // html sources are top-level pages, partials only trigger rebuilds
        assert!(table.matches(Category::Html, &table.root().join("src/html/index.html")));
        assert!(!table.matches(Category::Html, &table.root().join("src/html/partials/h.html")));
        assert_eq!(
            table.classify(&table.root().join("src/html/partials/h.html")),
            vec![Category::Html]
        );
    }

    #[test]
    fn classifies_font_svg_separately_from_images() {
        let temp = tempdir().unwrap();
        let table = PathTable::new(temp.path());
        assert_eq!(
            table.classify(&table.root().join("src/font/icons/glyphs.svg")),
            vec![Category::Font]
        );
        assert_eq!(
            table.classify(&table.root().join("src/img/logo.svg")),
            vec![Category::Images]
        );
        assert!(table.classify(&table.root().join("README.md")).is_empty());
    }

    #[test]
    fn enumerates_sorted_sources_with_relative_paths() {
        let temp = tempdir().unwrap();
        touch(temp.path(), "src/js/b.js");
        touch(temp.path(), "src/js/lib/a.js");
        touch(temp.path(), "src/js/notes.txt");

        let table = PathTable::new(temp.path());
        let files = table.enumerate(Category::Scripts);
        let relative: Vec<_> = files.iter().map(|f| f.relative.clone()).collect();

        assert_eq!(relative, vec![PathBuf::from("b.js"), PathBuf::from("lib/a.js")]);
    }

    #[test]
    fn missing_source_directory_is_empty() {
        let temp = tempdir().unwrap();
        let table = PathTable::new(temp.path());
        assert!(table.enumerate(Category::Font).is_empty());
    }

    #[test]
    fn malformed_glob_disables_category() {
        let temp = tempdir().unwrap();
        touch(temp.path(), "src/js/a.js");

        let mut overrides = BTreeMap::new();
        overrides.insert(
            "scripts".to_string(),
            PathOverride {
                src: Some(vec!["src/js/{a.js".to_string()]),
                ..Default::default()
            },
        );
        let table = PathTable::with_overrides(temp.path(), PathBuf::from("dist"), &overrides);

        assert!(table.enumerate(Category::Scripts).is_empty());
        assert!(table.classify(&table.root().join("src/js/a.js")).is_empty());
    }

    #[test]
    fn overrides_replace_sources_and_watch() {
        let temp = tempdir().unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "style".to_string(),
            PathOverride {
                src: Some(vec!["assets/styles/**/*.scss".to_string()]),
                dest: Some(PathBuf::from("public/css")),
                ..Default::default()
            },
        );
        let table = PathTable::with_overrides(temp.path(), PathBuf::from("public"), &overrides);

        assert_eq!(table.dest_dir(Category::Style), table.root().join("public/css"));
        assert_eq!(
            table.classify(&table.root().join("assets/styles/x.scss")),
            vec![Category::Style]
        );
        assert_eq!(table.url_path(Category::Style, Path::new("main.min.css")), "/css/main.min.css");
    }

    #[test]
    fn watch_dirs_are_deduplicated() {
        let temp = tempdir().unwrap();
        let table = PathTable::new(temp.path());
        let dirs = table.watch_dirs();
        assert_eq!(dirs.len(), 5);
        assert!(dirs.contains(&table.root().join("src/html")));
    }

    #[test]
    fn url_paths_are_rooted_at_dist() {
        let temp = tempdir().unwrap();
        let table = PathTable::new(temp.path());
        assert_eq!(table.url_path(Category::Style, Path::new("main.min.css")), "/css/main.min.css");
        assert_eq!(table.url_path(Category::Html, Path::new("index.html")), "/index.html");
    }
}
