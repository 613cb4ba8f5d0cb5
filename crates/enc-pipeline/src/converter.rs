//! Chart cell → GeoJSON conversion.
//!
//! Conversion is delegated to GDAL's `ogr2ogr` (one invocation per S-57
//! object class) or read from GeoJSON files produced by an earlier run.
//! Every returned feature carries an `enc_layer` property naming its source
//! object class, which later decides the tile layer it lands in.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use enc_common::{ChartCell, Feature, FeatureCollection};

use crate::layers::LayerSpec;

/// Property naming the S-57 object class a feature came from.
pub const LAYER_PROPERTY: &str = "enc_layer";

/// `OGR_S57_OPTIONS` needed to get soundings with depth and split
/// multipoints.
pub const DEFAULT_S57_OPTIONS: &str =
    "RETURN_PRIMITIVES=ON,RETURN_LINKAGES=ON,LNAM_REFS=ON,SPLIT_MULTIPOINT=ON,ADD_SOUNDG_DEPTH=ON";

/// ogr2ogr's message when the cell simply lacks an object class.
const MISSING_LAYER_MESSAGE: &str = "Couldn't fetch requested layer";

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Chart source not found: {0}")]
    MissingSource(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Converter produced invalid GeoJSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Turns a chart cell into GeoJSON features.
///
/// Implementations must not mutate shared state; the assembler calls them
/// concurrently for distinct cells.
#[async_trait]
pub trait ChartConverter: Send + Sync {
    async fn convert(&self, cell: &ChartCell) -> Result<FeatureCollection, ConversionError>;
}

/// Runs `ogr2ogr` against `<enc_root>/<id>/<id>.000`.
#[derive(Debug, Clone)]
pub struct Ogr2OgrConverter {
    program: String,
    enc_root: PathBuf,
    layers: Vec<LayerSpec>,
    s57_options: String,
}

impl Ogr2OgrConverter {
    pub fn new(program: impl Into<String>, enc_root: impl Into<PathBuf>, layers: Vec<LayerSpec>) -> Self {
        Self {
            program: program.into(),
            enc_root: enc_root.into(),
            layers,
            s57_options: DEFAULT_S57_OPTIONS.to_string(),
        }
    }

    pub fn with_s57_options(mut self, options: impl Into<String>) -> Self {
        self.s57_options = options.into();
        self
    }

    /// Location of the base `.000` file for a cell.
    pub fn source_path(&self, cell_id: &str) -> PathBuf {
        self.enc_root.join(cell_id).join(format!("{}.000", cell_id))
    }

    async fn convert_layer(
        &self,
        source: &Path,
        layer: &LayerSpec,
    ) -> Result<Vec<Feature>, ConversionError> {
        let output = Command::new(&self.program)
            .env("OGR_S57_OPTIONS", &self.s57_options)
            .args(["-nlt", layer.ogr_type(), "-skipfailures", "-f", "GeoJSON", "/vsistdout/"])
            .arg(source)
            .arg(&layer.name)
            .stdin(Stdio::null())
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if stderr.contains(MISSING_LAYER_MESSAGE) {
                debug!(layer = %layer.name, "Layer not present in cell");
                return Ok(Vec::new());
            }
            return Err(ConversionError::Tool {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let collection: FeatureCollection = serde_json::from_slice(&output.stdout)?;
        Ok(tag_layer(collection.features, &layer.name))
    }
}

#[async_trait]
impl ChartConverter for Ogr2OgrConverter {
    #[instrument(skip(self, cell), fields(cell = %cell.id))]
    async fn convert(&self, cell: &ChartCell) -> Result<FeatureCollection, ConversionError> {
        let source = self.source_path(&cell.id);
        if !tokio::fs::try_exists(&source).await? {
            return Err(ConversionError::MissingSource(source));
        }

        let mut features = Vec::new();
        for layer in &self.layers {
            let layer_features = self.convert_layer(&source, layer).await?;
            debug!(layer = %layer.name, features = layer_features.len(), "Layer converted");
            features.extend(layer_features);
        }

        Ok(FeatureCollection::new().with_features(features))
    }
}

/// Reads `<dir>/<cell>_<LAYER>.geojson` files written by an earlier run.
///
/// A missing layer file means the layer is empty; a cell with no files at
/// all is a conversion failure.
#[derive(Debug, Clone)]
pub struct PreconvertedConverter {
    dir: PathBuf,
    layers: Vec<LayerSpec>,
}

impl PreconvertedConverter {
    pub fn new(dir: impl Into<PathBuf>, layers: Vec<LayerSpec>) -> Self {
        Self {
            dir: dir.into(),
            layers,
        }
    }

    pub fn layer_path(&self, cell_id: &str, layer: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.geojson", cell_id, layer))
    }
}

#[async_trait]
impl ChartConverter for PreconvertedConverter {
    async fn convert(&self, cell: &ChartCell) -> Result<FeatureCollection, ConversionError> {
        let mut features = Vec::new();
        let mut found = false;

        for layer in &self.layers {
            let path = self.layer_path(&cell.id, &layer.name);
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            found = true;
            let collection: FeatureCollection = serde_json::from_slice(&content)?;
            features.extend(tag_layer(collection.features, &layer.name));
        }

        if !found {
            return Err(ConversionError::MissingSource(self.dir.join(&cell.id)));
        }
        Ok(FeatureCollection::new().with_features(features))
    }
}

fn tag_layer(features: Vec<Feature>, layer: &str) -> Vec<Feature> {
    features
        .into_iter()
        .map(|mut feature| {
            feature.set_property(LAYER_PROPERTY, layer);
            feature
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{default_layers, LayerGeometry};
    use enc_common::{BoundingBox, UsageBand};

    fn cell() -> ChartCell {
        ChartCell::from_bbox("US5TEST1", UsageBand::Harbor, BoundingBox::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn test_source_path_layout() {
        let converter = Ogr2OgrConverter::new("ogr2ogr", "/data/ENC_ROOT", default_layers());
        assert_eq!(
            converter.source_path("US5MA11M"),
            PathBuf::from("/data/ENC_ROOT/US5MA11M/US5MA11M.000")
        );
    }

    #[tokio::test]
    async fn test_ogr2ogr_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Ogr2OgrConverter::new("ogr2ogr", dir.path(), default_layers());
        let result = converter.convert(&cell()).await;
        assert!(matches!(result, Err(ConversionError::MissingSource(_))));
    }

    #[tokio::test]
    async fn test_preconverted_reads_and_tags_layers() {
        let dir = tempfile::tempdir().unwrap();
        let land = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Point","coordinates":[0.5,0.5,12.0]},"properties":{"DEPTH":12.0}}
        ]}"#;
        std::fs::write(dir.path().join("US5TEST1_SOUNDG.geojson"), land).unwrap();

        let converter = PreconvertedConverter::new(
            dir.path(),
            vec![
                LayerSpec::new("LNDARE", LayerGeometry::Polygon),
                LayerSpec::new("SOUNDG", LayerGeometry::Point),
            ],
        );
        let collection = converter.convert(&cell()).await.unwrap();

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.features[0].property_str(LAYER_PROPERTY), Some("SOUNDG"));
    }

    #[tokio::test]
    async fn test_preconverted_without_files_fails() {
        let dir = tempfile::tempdir().unwrap();
        let converter = PreconvertedConverter::new(dir.path(), default_layers());
        let result = converter.convert(&cell()).await;
        assert!(matches!(result, Err(ConversionError::MissingSource(_))));
    }
}
