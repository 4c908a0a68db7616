//! Transform collaborators for the kiln asset pipeline.
//!
//! Each collaborator turns the sources matched for one asset category into
//! output files: Sass to minified CSS, scripts to a transpiled bundle, images
//! to optimized images, fonts to web font formats and HTML pages to minified
//! pages with their includes resolved.

pub mod fonts;
pub mod html;
pub mod images;
pub mod include;
pub mod scripts;
pub mod styles;
pub mod traits;

pub use fonts::FontTransform;
pub use html::HtmlTransform;
pub use images::ImageTransform;
pub use include::{IncludeResolver, MAX_INCLUDE_DEPTH};
pub use scripts::{ScriptTransform, BUNDLE_NAME};
pub use styles::{StyleTargets, StyleTransform};
pub use traits::{
    FileFailure, OutputFile, SourceFile, Transform, TransformContext, TransformError,
    TransformOutput,
};
