//! Tile archive emission.
//!
//! The default emitter hands the assembled features to `tippecanoe` (one run
//! per source layer) and merges the per-layer archives with `tile-join`.
//! Features that are identical across consecutive zooms are written once
//! with a `tippecanoe.minzoom`/`maxzoom` range instead of once per zoom.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use enc_common::{BoundingBox, EncError, EncResult, Feature, TippecanoeHints, ZoomLevel};

use crate::assembler::Assembly;
use crate::converter::LAYER_PROPERTY;
use crate::layers::{LayerGeometry, LayerSpec};

/// Tile layer used for features without an `enc_layer` tag.
pub const DEFAULT_TILE_LAYER: &str = "features";

/// The archive produced by a tiling run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileArchive {
    pub path: PathBuf,
    pub min_zoom: ZoomLevel,
    pub max_zoom: ZoomLevel,
    /// Features written after cross-zoom coalescing
    pub feature_count: usize,
    pub layers: Vec<String>,
}

#[async_trait]
pub trait TileEmitter: Send + Sync {
    /// Build the tile archive for an assembly.
    ///
    /// An assembly without features still yields a valid, empty archive.
    async fn emit(&self, assembly: &Assembly) -> EncResult<TileArchive>;
}

/// `tippecanoe` + `tile-join` backed emitter writing MBTiles.
#[derive(Debug, Clone)]
pub struct TippecanoeEmitter {
    pub tippecanoe: String,
    pub tile_join: String,
    pub layers: Vec<LayerSpec>,
    /// Scratch directory for line-delimited GeoJSON and per-layer archives
    pub work_dir: PathBuf,
    pub output: PathBuf,
    pub name: String,
}

impl TippecanoeEmitter {
    pub fn new(work_dir: impl Into<PathBuf>, output: impl Into<PathBuf>, layers: Vec<LayerSpec>) -> Self {
        Self {
            tippecanoe: "tippecanoe".to_string(),
            tile_join: "tile-join".to_string(),
            layers,
            work_dir: work_dir.into(),
            output: output.into(),
            name: "enc".to_string(),
        }
    }

    pub fn with_programs(mut self, tippecanoe: impl Into<String>, tile_join: impl Into<String>) -> Self {
        self.tippecanoe = tippecanoe.into();
        self.tile_join = tile_join.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn layer_args(&self, layer: &str) -> Vec<String> {
        self.layers
            .iter()
            .find(|spec| spec.name == layer)
            .cloned()
            .unwrap_or_else(|| LayerSpec::new(layer, LayerGeometry::Polygon))
            .tippecanoe_args()
    }

    async fn run_tippecanoe(
        &self,
        layer: &str,
        input: &Path,
        output: &Path,
        min_zoom: ZoomLevel,
        max_zoom: ZoomLevel,
    ) -> EncResult<()> {
        let mut command = Command::new(&self.tippecanoe);
        command
            .arg("-o")
            .arg(output)
            .args(["--force", "-P", "-l", layer])
            .arg(format!("-Z{}", min_zoom))
            .arg(format!("-z{}", max_zoom))
            .args(self.layer_args(layer))
            .arg(input);
        run_tool(command, &self.tippecanoe).await
    }

    async fn run_tile_join(&self, inputs: &[PathBuf]) -> EncResult<()> {
        let mut command = Command::new(&self.tile_join);
        command
            .args(["--force", "-n", self.name.as_str(), "-o"])
            .arg(&self.output)
            .args(inputs);
        run_tool(command, &self.tile_join).await
    }
}

#[async_trait]
impl TileEmitter for TippecanoeEmitter {
    #[instrument(skip_all, fields(output = %self.output.display()))]
    async fn emit(&self, assembly: &Assembly) -> EncResult<TileArchive> {
        validate_assembly(assembly)?;

        let min_zoom = assembly.min_zoom().unwrap_or(0);
        let max_zoom = assembly.max_zoom().unwrap_or(min_zoom);
        let features = coalesce_zooms(assembly);

        if let Some(parent) = self.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if features.is_empty() {
            warn!("No features assembled, writing empty archive");
            write_empty_mbtiles(&self.output, &self.name, &assembly.bbox, min_zoom, max_zoom).await?;
            return Ok(TileArchive {
                path: self.output.clone(),
                min_zoom,
                max_zoom,
                feature_count: 0,
                layers: Vec::new(),
            });
        }

        let feature_count = features.len();
        let by_layer = split_layers(features);
        let scratch = self.work_dir.join("tiling");
        tokio::fs::create_dir_all(&scratch).await?;

        let mut layer_archives = Vec::new();
        for (layer, layer_features) in &by_layer {
            let input = scratch.join(format!("{}.geojsonl", layer));
            write_geojsonl(&input, layer_features).await?;

            let archive = scratch.join(format!("{}.mbtiles", layer));
            info!(layer = %layer, features = layer_features.len(), "Running tippecanoe");
            self.run_tippecanoe(layer, &input, &archive, min_zoom, max_zoom)
                .await?;
            layer_archives.push(archive);
        }

        info!(layers = layer_archives.len(), "Joining layer archives");
        self.run_tile_join(&layer_archives).await?;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(error = %e, "Failed to remove tiling scratch directory");
        }

        Ok(TileArchive {
            path: self.output.clone(),
            min_zoom,
            max_zoom,
            feature_count,
            layers: by_layer.into_keys().collect(),
        })
    }
}

async fn run_tool(mut command: Command, program: &str) -> EncResult<()> {
    debug!(program = %program, "Spawning tiling tool");
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| EncError::TilingFailed {
            zoom: None,
            message: format!("failed to run {}: {}", program, e),
        })?;

    if !output.status.success() {
        return Err(EncError::TilingFailed {
            zoom: None,
            message: format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

/// Reject geometry the tiling tool cannot take, naming the zoom.
pub fn validate_assembly(assembly: &Assembly) -> EncResult<()> {
    for (zoom, collection) in &assembly.collections {
        for feature in &collection.features {
            let problem = match &feature.geometry {
                None => Some("null geometry".to_string()),
                Some(geometry) if !geometry.is_well_formed() => {
                    Some(format!("malformed {}", geometry.type_name()))
                }
                Some(_) => None,
            };
            if let Some(problem) = problem {
                return Err(EncError::TilingFailed {
                    zoom: Some(*zoom),
                    message: format!(
                        "{} in feature from cell {}",
                        problem,
                        feature.property_str(crate::assembler::CELL_PROPERTY).unwrap_or("?")
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Merge features repeated over consecutive zooms into one feature with a
/// zoom range.
///
/// Output order is deterministic: by first zoom, then by serialized form.
pub fn coalesce_zooms(assembly: &Assembly) -> Vec<Feature> {
    let mut open: BTreeMap<String, (ZoomLevel, ZoomLevel, &Feature)> = BTreeMap::new();
    let mut done: Vec<(ZoomLevel, String, ZoomLevel, &Feature)> = Vec::new();

    for (&zoom, collection) in &assembly.collections {
        for feature in &collection.features {
            let key = match serde_json::to_string(feature) {
                Ok(key) => key,
                Err(_) => continue,
            };
            let last = open.get(&key).map(|(_, last, _)| *last);
            match last {
                Some(last) if last == zoom => {}
                Some(last) if last.checked_add(1) == Some(zoom) => {
                    if let Some(entry) = open.get_mut(&key) {
                        entry.1 = zoom;
                    }
                }
                _ => {
                    if let Some((start, last, f)) = open.insert(key.clone(), (zoom, zoom, feature)) {
                        done.push((start, key, last, f));
                    }
                }
            }
        }

        let stale: Vec<String> = open
            .iter()
            .filter(|(_, (_, last, _))| *last < zoom)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some((start, last, f)) = open.remove(&key) {
                done.push((start, key, last, f));
            }
        }
    }
    done.extend(open.into_iter().map(|(key, (start, last, f))| (start, key, last, f)));
    done.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    done.into_iter()
        .map(|(min, _, max, feature)| {
            let mut out = feature.clone();
            let layer = feature
                .property_str(LAYER_PROPERTY)
                .unwrap_or(DEFAULT_TILE_LAYER)
                .to_string();
            out.tippecanoe = Some(TippecanoeHints {
                minzoom: Some(min),
                maxzoom: Some(max),
                layer: Some(layer),
            });
            out
        })
        .collect()
}

fn split_layers(features: Vec<Feature>) -> BTreeMap<String, Vec<Feature>> {
    let mut by_layer: BTreeMap<String, Vec<Feature>> = BTreeMap::new();
    for feature in features {
        let layer = feature
            .tippecanoe
            .as_ref()
            .and_then(|hints| hints.layer.clone())
            .unwrap_or_else(|| DEFAULT_TILE_LAYER.to_string());
        by_layer.entry(layer).or_default().push(feature);
    }
    by_layer
}

async fn write_geojsonl(path: &Path, features: &[Feature]) -> EncResult<()> {
    let mut file = tokio::fs::File::create(path).await?;
    for feature in features {
        let mut line = serde_json::to_vec(feature)?;
        line.push(b'\n');
        file.write_all(&line).await?;
    }
    file.flush().await?;
    Ok(())
}

fn sqlite_error(e: sqlx::Error) -> EncError {
    EncError::TilingFailed {
        zoom: None,
        message: format!("MBTiles: {}", e),
    }
}

/// Write an MBTiles archive with metadata and an empty tile table.
pub async fn write_empty_mbtiles(
    path: &Path,
    name: &str,
    bbox: &BoundingBox,
    min_zoom: ZoomLevel,
    max_zoom: ZoomLevel,
) -> EncResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(sqlite_error)?;

    for statement in [
        "CREATE TABLE metadata (name TEXT, value TEXT)",
        "CREATE UNIQUE INDEX name ON metadata (name)",
        "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB)",
        "CREATE UNIQUE INDEX tile_index ON tiles (zoom_level, tile_column, tile_row)",
    ] {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .map_err(sqlite_error)?;
    }

    let center_x = (bbox.min_x + bbox.max_x) / 2.0;
    let center_y = (bbox.min_y + bbox.max_y) / 2.0;
    let metadata = [
        ("name", name.to_string()),
        ("format", "pbf".to_string()),
        ("type", "overlay".to_string()),
        ("minzoom", min_zoom.to_string()),
        ("maxzoom", max_zoom.to_string()),
        ("bounds", bbox.to_string()),
        ("center", format!("{},{},{}", center_x, center_y, min_zoom)),
        ("json", r#"{"vector_layers":[]}"#.to_string()),
    ];
    for (key, value) in metadata {
        sqlx::query("INSERT INTO metadata (name, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&pool)
            .await
            .map_err(sqlite_error)?;
    }

    pool.close().await;
    info!(path = %path.display(), "Wrote empty MBTiles archive");
    Ok(())
}

/// Read the metadata table of an MBTiles archive.
pub async fn read_mbtiles_metadata(path: &Path) -> EncResult<BTreeMap<String, String>> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(sqlite_error)?;

    let rows: Vec<(String, String)> = sqlx::query_as("SELECT name, value FROM metadata")
        .fetch_all(&pool)
        .await
        .map_err(sqlite_error)?;
    pool.close().await;

    Ok(rows.into_iter().collect())
}

/// Number of rows in the tiles table of an MBTiles archive.
pub async fn count_mbtiles_tiles(path: &Path) -> EncResult<i64> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(sqlite_error)?;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tiles")
        .fetch_one(&pool)
        .await
        .map_err(sqlite_error)?;
    pool.close().await;
    Ok(count)
}
