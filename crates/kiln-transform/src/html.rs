//! HTML page assembly and minification.

use std::path::PathBuf;

use minify_html::Cfg;
use rayon::prelude::*;

use crate::include::IncludeResolver;
use crate::traits::{OutputFile, SourceFile, Transform, TransformContext, TransformError, TransformOutput};

/// Resolves `@@include` directives, then minifies each page.
#[derive(Debug, Clone, Default)]
pub struct HtmlTransform {
    resolver: IncludeResolver,
}

impl HtmlTransform {
    pub fn new(resolver: IncludeResolver) -> Self {
        Self { resolver }
    }

    fn render(&self, source: &SourceFile, ctx: &TransformContext) -> Result<OutputFile, TransformError> {
        let resolved = self.resolver.resolve_file(&source.path)?;
        let contents = if ctx.minify {
            minify(&resolved)
        } else {
            resolved.into_bytes()
        };
        Ok(OutputFile::new(source.relative.clone(), contents))
    }
}

impl Transform for HtmlTransform {
    fn name(&self) -> &'static str {
        "html"
    }

    fn run(&self, inputs: &[SourceFile], ctx: &TransformContext) -> TransformOutput {
        let results: Vec<(PathBuf, Result<OutputFile, TransformError>)> = inputs
            .par_iter()
            .map(|s| (s.path.clone(), self.render(s, ctx)))
            .collect();

        let mut output = TransformOutput::default();
        for (path, result) in results {
            match result {
                Ok(file) => output.push_file(file),
                Err(e) => output.push_failure(&path, e),
            }
        }
        output
    }
}

/// Collapse whitespace and strip comments, keeping every tag.
pub fn minify(html: &str) -> Vec<u8> {
    let mut cfg = Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    minify_html::minify(html.as_bytes(), &cfg)
}
