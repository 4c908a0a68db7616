//! Raster and vector image optimization.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::LazyLock;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use rayon::prelude::*;
use regex::Regex;

use crate::traits::{
    read_source, OutputFile, SourceFile, Transform, TransformContext, TransformError,
    TransformOutput,
};

/// Optimizes PNG, JPEG and SVG images; other formats pass through.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransform {
    /// JPEG re-encode quality (1-100)
    pub jpeg_quality: u8,

    /// oxipng preset (0-6)
    pub png_level: u8,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            jpeg_quality: 82,
            png_level: 5,
        }
    }
}

impl ImageTransform {
    fn optimize(&self, source: &SourceFile) -> Result<OutputFile, TransformError> {
        let original = read_source(&source.path)?;
        let optimized = match source.extension().as_str() {
            "png" => optimize_png(&original, self.png_level)?,
            "jpg" | "jpeg" => optimize_jpeg(&original, self.jpeg_quality)?,
            "svg" => optimize_svg(&original)?,
            _ => original.clone(),
        };

        // Never ship a "larger" optimized image.
        let contents = if optimized.len() < original.len() {
            optimized
        } else {
            original
        };
        Ok(OutputFile::new(source.relative.clone(), contents))
    }
}

impl Transform for ImageTransform {
    fn name(&self) -> &'static str {
        "images"
    }

    fn run(&self, inputs: &[SourceFile], _ctx: &TransformContext) -> TransformOutput {
        let results: Vec<(PathBuf, Result<OutputFile, TransformError>)> = inputs
            .par_iter()
            .map(|s| (s.path.clone(), self.optimize(s)))
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

/// Losslessly recompress a PNG.
pub fn optimize_png(data: &[u8], level: u8) -> Result<Vec<u8>, TransformError> {
    let options = oxipng::Options::from_preset(level.min(6));
    oxipng::optimize_from_memory(data, &options).map_err(|e| TransformError::Image(e.to_string()))
}

/// Re-encode a JPEG at the given quality.
pub fn optimize_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, TransformError> {
    let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| TransformError::Image(e.to_string()))?;

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    DynamicImage::ImageRgb8(decoded.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| TransformError::Image(e.to_string()))?;

    Ok(buf.into_inner())
}

/// Strip comments and inter-tag whitespace from an SVG document.
///
/// `<text>`, `<style>` and CDATA blocks are kept verbatim: whitespace there
/// is rendered or parsed.
pub fn optimize_svg(data: &[u8]) -> Result<Vec<u8>, TransformError> {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Invalid comment regex"));
    static BETWEEN_TAGS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r">\s+<").expect("Invalid whitespace regex"));
    static VERBATIM_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<text\b.*?</text>|<style\b.*?</style>|<!\[CDATA\[.*?\]\]>")
            .expect("Invalid verbatim block regex")
    });

    let text = std::str::from_utf8(data).map_err(|e| TransformError::Image(format!("SVG is not UTF-8: {e}")))?;
    if !text.contains("<svg") {
        return Err(TransformError::Image("missing <svg> root element".to_string()));
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let blocks: Vec<_> = VERBATIM_RE.find_iter(text).collect();
    for (i, block) in blocks.iter().enumerate() {
        let markup = collapse_markup(&text[last..block.start()], &COMMENT_RE, &BETWEEN_TAGS_RE);
        out.push_str(trim_tag_gap(&markup, i > 0, true));
        out.push_str(block.as_str());
        last = block.end();
    }
    let markup = collapse_markup(&text[last..], &COMMENT_RE, &BETWEEN_TAGS_RE);
    out.push_str(trim_tag_gap(&markup, !blocks.is_empty(), false));

    Ok(out.trim().as_bytes().to_vec())
}

fn collapse_markup(markup: &str, comments: &Regex, between_tags: &Regex) -> String {
    let stripped = comments.replace_all(markup, "");
    between_tags.replace_all(&stripped, "><").into_owned()
}

/// Trim whitespace that separates a kept block from a neighbouring tag.
fn trim_tag_gap(markup: &str, after_block: bool, before_block: bool) -> &str {
    let mut gap = markup;
    if (after_block && gap.trim_start().starts_with('<')) || gap.trim().is_empty() {
        gap = gap.trim_start();
    }
    if before_block && gap.trim_end().ends_with('>') {
        gap = gap.trim_end();
    }
    gap
}
