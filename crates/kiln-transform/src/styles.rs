//! SCSS compilation, vendor prefixing and minification.

use std::path::{Path, PathBuf};

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use rayon::prelude::*;

use crate::traits::{OutputFile, SourceFile, Transform, TransformContext, TransformError, TransformOutput};

/// Browser major versions to prefix and lower syntax for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleTargets {
    pub chrome: Option<u32>,
    pub edge: Option<u32>,
    pub firefox: Option<u32>,
    pub safari: Option<u32>,
    pub ios_saf: Option<u32>,
    pub opera: Option<u32>,
    pub samsung: Option<u32>,
    pub android: Option<u32>,
    pub ie: Option<u32>,
}

impl Default for StyleTargets {
    fn default() -> Self {
        Self {
            chrome: Some(95),
            edge: Some(95),
            firefox: Some(90),
            safari: Some(13),
            ios_saf: Some(13),
            opera: Some(80),
            samsung: Some(15),
            android: None,
            ie: None,
        }
    }
}

impl StyleTargets {
    fn to_targets(self) -> Targets {
        // lightningcss encodes versions as major << 16 | minor << 8 | patch
        let v = |major: Option<u32>| major.map(|m| m << 16);
        Targets::from(Browsers {
            android: v(self.android),
            chrome: v(self.chrome),
            edge: v(self.edge),
            firefox: v(self.firefox),
            ie: v(self.ie),
            ios_saf: v(self.ios_saf),
            opera: v(self.opera),
            safari: v(self.safari),
            samsung: v(self.samsung),
        })
    }
}

/// Compiles each non-partial `.scss` entry into `<stem>.min.css`.
#[derive(Debug, Clone, Default)]
pub struct StyleTransform {
    targets: StyleTargets,
}

impl StyleTransform {
    pub fn new(targets: StyleTargets) -> Self {
        Self { targets }
    }

    fn compile(&self, source: &SourceFile, ctx: &TransformContext) -> Result<Vec<OutputFile>, TransformError> {
        let css = compile_scss(&source.path, &ctx.source_root)?;
        let css_name = output_name(&source.path);
        let map_name = format!("{css_name}.map");
        let (mut code, map) = process_css(
            &css,
            &source.relative.to_string_lossy(),
            self.targets.to_targets(),
            ctx.minify,
            ctx.source_maps,
        )?;

        let dir = source.relative.parent().unwrap_or(Path::new("")).to_path_buf();
        let mut files = Vec::with_capacity(2);
        if let Some(map) = map {
            code.push_str(&format!("\n/*# sourceMappingURL={map_name} */\n"));
            files.push(OutputFile::new(dir.join(&map_name), map));
        }
        files.insert(0, OutputFile::new(dir.join(&css_name), code));
        Ok(files)
    }
}

impl Transform for StyleTransform {
    fn name(&self) -> &'static str {
        "styles"
    }

    fn run(&self, inputs: &[SourceFile], ctx: &TransformContext) -> TransformOutput {
        let results: Vec<(PathBuf, Result<Vec<OutputFile>, TransformError>)> = inputs
            .par_iter()
            .filter(|s| !is_partial(&s.path))
            .map(|s| (s.path.clone(), self.compile(s, ctx)))
            .collect();

        let mut output = TransformOutput::default();
        for (path, result) in results {
            match result {
                Ok(files) => files.into_iter().for_each(|f| output.push_file(f)),
                Err(e) => output.push_failure(&path, e),
            }
        }
        output
    }

    fn primary_output(&self, source: &SourceFile) -> PathBuf {
        let dir = source.relative.parent().unwrap_or(Path::new(""));
        dir.join(output_name(&source.path))
    }
}

/// Sass partials (`_name.scss`) are only compiled through `@use`/`@import`.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

fn output_name(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("main");
    format!("{stem}.min.css")
}

/// Compile a Sass file to plain CSS.
pub fn compile_scss(path: &Path, source_root: &Path) -> Result<String, TransformError> {
    let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
    if let Some(dir) = path.parent() {
        options = options.load_path(dir);
    }
    options = options.load_path(source_root);

    grass::from_path(path, &options).map_err(|e| TransformError::Compile(e.to_string()))
}

/// Prefix, lower and optionally minify CSS. Returns the code and the source
/// map JSON when requested.
///
/// The map names `filename` as its only source, with the compiled CSS it
/// indexes as the source content.
pub fn process_css(
    css: &str,
    filename: &str,
    targets: Targets,
    minify: bool,
    source_maps: bool,
) -> Result<(String, Option<String>), TransformError> {
    let mut stylesheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| TransformError::Syntax(e.to_string()))?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| TransformError::Minify(e.to_string()))?;

    let mut source_map = None;
    if source_maps {
        let mut sm = SourceMap::new("/");
        sm.add_source(filename);
        sm.set_source_content(0, css)
            .map_err(|e| TransformError::Minify(e.to_string()))?;
        source_map = Some(sm);
    }
    let result = stylesheet
        .to_css(PrinterOptions {
            minify,
            targets,
            source_map: source_map.as_mut(),
            ..PrinterOptions::default()
        })
        .map_err(|e| TransformError::Minify(e.to_string()))?;

    let map = match source_map {
        Some(mut sm) => Some(
            sm.to_json(None)
                .map_err(|e| TransformError::Minify(e.to_string()))?,
        ),
        None => None,
    };

    Ok((result.code, map))
}
