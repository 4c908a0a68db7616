//! JavaScript bundling, transpiling and minification.
//!
//! Sources are compiled one by one as classic scripts and concatenated in
//! path order into a single `main.min.js`, so top-level names stay shared
//! across files. The per-file source maps are merged into one bundle map.

use std::path::{Path, PathBuf};

use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc_sourcemap::{ConcatSourceMapBuilder, SourceMap};
use oxc::span::SourceType;
use oxc::transformer::{TransformOptions, Transformer};

use crate::traits::{
    read_source_text, OutputFile, SourceFile, Transform, TransformContext, TransformError,
    TransformOutput,
};

/// Name of the bundle written to the scripts destination.
pub const BUNDLE_NAME: &str = "main.min.js";

/// Bundles every script into [`BUNDLE_NAME`].
#[derive(Debug, Clone)]
pub struct ScriptTransform {
    /// ECMAScript target to lower syntax to (e.g. "es2015")
    target: String,
}

impl Default for ScriptTransform {
    fn default() -> Self {
        Self::new("es2015")
    }
}

impl ScriptTransform {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Compile and join `sources` (relative name, text). A failure names the
    /// file it came from.
    fn bundle(
        &self,
        sources: &[(PathBuf, String)],
        ctx: &TransformContext,
    ) -> Result<Vec<OutputFile>, (PathBuf, TransformError)> {
        let mut code = String::new();
        let mut maps: Vec<(SourceMap, u32)> = Vec::new();

        for (name, text) in sources {
            let (chunk, map) = compile_js(text, name, &self.target, ctx.minify, ctx.source_maps)
                .map_err(|e| (name.clone(), e))?;
            if let Some(map) = map {
                maps.push((map, code.matches('\n').count() as u32));
            }
            code.push_str(&chunk);
            code.push_str(";\n");
        }

        let mut files = Vec::with_capacity(2);
        if ctx.source_maps {
            let map_name = format!("{BUNDLE_NAME}.map");
            let parts: Vec<(&SourceMap, u32)> = maps.iter().map(|(map, offset)| (map, *offset)).collect();
            let merged = ConcatSourceMapBuilder::from_sourcemaps(&parts).into_sourcemap();
            code.push_str(&format!("//# sourceMappingURL={map_name}\n"));
            files.push(OutputFile::new(map_name, merged.to_json_string()));
        }
        files.insert(0, OutputFile::new(BUNDLE_NAME, code));
        Ok(files)
    }
}

impl Transform for ScriptTransform {
    fn name(&self) -> &'static str {
        "scripts"
    }

    fn run(&self, inputs: &[SourceFile], ctx: &TransformContext) -> TransformOutput {
        let mut output = TransformOutput::default();
        let mut sources = Vec::with_capacity(inputs.len());

        for input in inputs {
            match read_source_text(&input.path).and_then(|text| check_syntax(&text).map(|_| text)) {
                Ok(text) => sources.push((input.relative.clone(), text)),
                Err(e) => output.push_failure(&input.path, e),
            }
        }

        // A partial bundle would silently drop code; keep the previous one.
        if !output.failures.is_empty() || sources.is_empty() {
            return output;
        }

        match self.bundle(&sources, ctx) {
            Ok(files) => files.into_iter().for_each(|f| output.push_file(f)),
            Err((name, e)) => {
                let path = inputs
                    .iter()
                    .find(|input| input.relative == name)
                    .map_or_else(|| ctx.source_root.join(&name), |input| input.path.clone());
                output.push_failure(&path, e);
            }
        }
        output
    }

    fn primary_output(&self, _source: &SourceFile) -> PathBuf {
        PathBuf::from(BUNDLE_NAME)
    }
}

fn source_type() -> SourceType {
    SourceType::mjs().with_module(false)
}

/// Parse a script and report the first syntax error.
pub fn check_syntax(source: &str) -> Result<(), TransformError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    match ret.errors.first() {
        Some(err) => Err(TransformError::Syntax(err.to_string())),
        None => Ok(()),
    }
}

/// Transpile one script to `target` and optionally minify. Returns the code
/// and, when requested, a source map naming `name` as its source.
pub fn compile_js(
    source: &str,
    name: &Path,
    target: &str,
    minify: bool,
    source_maps: bool,
) -> Result<(String, Option<SourceMap>), TransformError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    if let Some(err) = ret.errors.first() {
        return Err(TransformError::Syntax(err.to_string()));
    }
    let mut program = ret.program;

    let options = TransformOptions::from_target(target).map_err(TransformError::Compile)?;
    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
    let transformed = Transformer::new(&allocator, name, &options)
        .build_with_scoping(scoping, &mut program);
    if let Some(err) = transformed.errors.first() {
        return Err(TransformError::Compile(err.to_string()));
    }

    let scoping = if minify {
        let options = MinifierOptions {
            // the top-level scope is shared with the other bundled files
            mangle: Some(MangleOptions {
                top_level: Some(false),
                ..MangleOptions::default()
            }),
            compress: Some(CompressOptions::smallest()),
        };
        Minifier::new(options).minify(&allocator, &mut program).scoping
    } else {
        None
    };

    let ret = Codegen::new()
        .with_options(CodegenOptions {
            minify,
            comments: if minify {
                CommentOptions::disabled()
            } else {
                CommentOptions::default()
            },
            source_map_path: source_maps.then(|| name.to_path_buf()),
            ..CodegenOptions::default()
        })
        .with_scoping(scoping)
        .build(&program);

    Ok((ret.code, ret.map))
}
