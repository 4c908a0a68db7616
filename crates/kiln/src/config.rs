//! Project configuration (pipeline.toml).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use kiln_pipeline::{Category, PathOverride, PathTable, TaskSettings, TransformRegistry, DEFAULT_KEEP};
use kiln_server::DevServerConfig;
use kiln_transform::{
    FontTransform, HtmlTransform, ImageTransform, ScriptTransform, StyleTargets, StyleTransform,
};

pub const CONFIG_FILE: &str = "pipeline.toml";

/// Configuration file structure (pipeline.toml).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: BTreeMap<String, PathOverride>,
    #[serde(default)]
    pub clean: CleanConfig,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub styles: StylesConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize)]
pub struct CleanConfig {
    #[serde(default = "default_keep")]
    pub keep: Vec<String>,
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            keep: default_keep(),
            dist: default_dist(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_true")]
    pub minify: bool,
    #[serde(default = "default_true")]
    pub source_maps: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            minify: true,
            source_maps: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct StylesConfig {
    pub targets: Option<TargetsConfig>,
}

/// Browser major versions; unset browsers are not targeted.
#[derive(Debug, Deserialize, Default)]
pub struct TargetsConfig {
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

#[derive(Debug, Deserialize)]
pub struct ScriptsConfig {
    #[serde(default = "default_script_target")]
    pub target: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            target: default_script_target(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_png_level")]
    pub png_level: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            png_level: default_png_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub open: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: true,
        }
    }
}

fn default_keep() -> Vec<String> {
    DEFAULT_KEEP.iter().map(|s| s.to_string()).collect()
}
fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}
fn default_true() -> bool {
    true
}
fn default_script_target() -> String {
    "es2015".to_string()
}
fn default_jpeg_quality() -> u8 {
    82
}
fn default_png_level() -> u8 {
    5
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

/// Load configuration.
///
/// Without an explicit path, `pipeline.toml` under `root` is used if it
/// exists. A file that exists but does not parse is an error.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<ConfigFile> {
    let path = match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root.join(path),
        None => {
            let path = root.join(CONFIG_FILE);
            if !path.exists() {
                tracing::debug!("No {} found, using defaults", CONFIG_FILE);
                return Ok(ConfigFile::default());
            }
            path
        }
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConfigFile =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

impl ConfigFile {
    pub fn path_table(&self, root: &Path) -> Arc<PathTable> {
        Arc::new(PathTable::with_overrides(root, self.clean.dist.clone(), &self.paths))
    }

    pub fn settings(&self) -> TaskSettings {
        TaskSettings {
            minify: self.build.minify,
            source_maps: self.build.source_maps,
        }
    }

    pub fn style_targets(&self) -> StyleTargets {
        match &self.styles.targets {
            Some(t) => StyleTargets {
                chrome: t.chrome,
                edge: t.edge,
                firefox: t.firefox,
                safari: t.safari,
                ios_saf: t.ios_saf,
                opera: t.opera,
                samsung: t.samsung,
                android: t.android,
                ie: t.ie,
            },
            None => StyleTargets::default(),
        }
    }

    /// Transforms configured for every category.
    pub fn registry(&self) -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        registry
            .register(Category::Style, StyleTransform::new(self.style_targets()))
            .register(Category::Html, HtmlTransform::default())
            .register(Category::Scripts, ScriptTransform::new(self.scripts.target.clone()))
            .register(
                Category::Images,
                ImageTransform {
                    jpeg_quality: self.images.jpeg_quality.clamp(1, 100),
                    png_level: self.images.png_level.min(6),
                },
            )
            .register(Category::Font, FontTransform);
        registry
    }

    /// Dev server settings for serving `table`'s output.
    pub fn server(&self, table: &PathTable) -> DevServerConfig {
        DevServerConfig {
            root: table.dist_root(),
            port: self.server.port,
            host: self.server.host.clone(),
            open: self.server.open,
        }
    }
}
