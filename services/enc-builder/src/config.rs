//! Builder configuration.
//!
//! Loaded from a YAML file with `${VAR}` and `${VAR:-default}` substitution.
//! Every field has a default, so an empty file (or no file) is valid.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use enc_pipeline::converter::DEFAULT_S57_OPTIONS;
use enc_pipeline::enc_root::DEFAULT_EXTENT_LAYER;
use enc_pipeline::{default_layers, LayerSpec, StyleOptions, ZoomBandMap, NOAA_ENC_URL};

/// Top-level builder configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Chart catalog: a JSON file path or an http(s) URL. Without one the
    /// cells under the ENC root are scanned.
    pub catalog: Option<String>,

    pub catalog_timeout_secs: Option<u64>,

    /// Usage band → native zoom range
    pub zoom_bands: ZoomBandMap,

    /// S-57 layers requested from the converter and tiled
    pub layers: Option<Vec<LayerSpec>>,

    pub converter: ConverterConfig,

    /// NOAA bundle download (`--get`)
    pub fetch: FetchConfig,

    pub tiling: TilingConfig,

    /// Concurrent cell conversions (default: number of CPUs)
    pub concurrency: Option<usize>,

    pub style: StyleOptions,

    /// MapLibre style used as the layer template
    pub style_template: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: String,
    /// Used to read cell extents and editions when scanning the ENC root
    pub ogrinfo: String,
    /// S-57 layer whose extent becomes the cell footprint
    pub extent_layer: String,
    /// Directory holding `<id>/<id>.000` cells (default: `<work-dir>/ENC_ROOT`)
    pub enc_root: Option<PathBuf>,
    pub s57_options: String,
    /// Read `<id>_<LAYER>.geojson` files from here instead of running ogr2ogr
    pub preconverted_dir: Option<PathBuf>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "ogr2ogr".to_string(),
            ogrinfo: "ogrinfo".to_string(),
            extent_layer: DEFAULT_EXTENT_LAYER.to_string(),
            enc_root: None,
            s57_options: DEFAULT_S57_OPTIONS.to_string(),
            preconverted_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url: NOAA_ENC_URL.to_string(),
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tippecanoe: String,
    pub tile_join: String,
    /// Archive file name inside the output directory
    pub archive_name: String,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tippecanoe: "tippecanoe".to_string(),
            tile_join: "tile-join".to_string(),
            archive_name: "enc.mbtiles".to_string(),
        }
    }
}

impl BuilderConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        // serde_yaml reads an empty document as unit, not as an empty map.
        let config: BuilderConfig = if expanded.trim().is_empty() {
            BuilderConfig::default()
        } else {
            serde_yaml::from_str(&expanded).context("Failed to parse YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn layers(&self) -> Vec<LayerSpec> {
        self.layers.clone().unwrap_or_else(default_layers)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.concurrency != Some(0),
            "concurrency must be at least 1"
        );

        if let Some(opacity) = self.style.fallback_opacity {
            anyhow::ensure!(
                (0.0..=1.0).contains(&opacity),
                "style.fallback_opacity must be within [0, 1], got {}",
                opacity
            );
        }
        anyhow::ensure!(
            self.style.background.iter().all(|c| (0.0..=1.0).contains(c)),
            "style.background components must be within [0, 1]"
        );

        let layers = self.layers();
        anyhow::ensure!(!layers.is_empty(), "At least one chart layer is required");
        let mut names = BTreeSet::new();
        for layer in &layers {
            anyhow::ensure!(
                names.insert(layer.name.as_str()),
                "Duplicate chart layer: {}",
                layer.name
            );
        }

        anyhow::ensure!(
            !self.tiling.archive_name.is_empty(),
            "tiling.archive_name cannot be empty"
        );
        anyhow::ensure!(!self.fetch.url.is_empty(), "fetch.url cannot be empty");
        Ok(())
    }
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}` and `${VAR:-default}` in YAML content.
///
/// Comment lines are copied verbatim.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
        } else {
            expand_line(line, &mut result)?;
        }
    }

    Ok(result)
}

fn expand_line(line: &str, result: &mut String) -> Result<()> {
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut expr = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(c) => expr.push(c),
                None => anyhow::bail!("Unclosed variable substitution: ${{{}", expr.trim_end()),
            }
        }
        result.push_str(&resolve_var_expr(&expr)?);
    }

    Ok(())
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    match expr.split_once(":-") {
        Some((name, default)) => match std::env::var(name.trim()) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Ok(default.to_string()),
        },
        None => std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr)),
    }
}
