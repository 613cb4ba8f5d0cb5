//! Run orchestration: catalog → coverage → selection → assembly → tiles,
//! with the style derived from the selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use enc_common::{BoundingBox, EncError, EncResult};

use crate::assembler::{CellFailure, GeometryAssembler};
use crate::catalog::{CatalogSource, ChartCatalog};
use crate::converter::ChartConverter;
use crate::coverage::resolve_coverage;
use crate::selector::{BandSelector, GapSummary, Selection, SelectionSummary};
use crate::style::{default_template, derive_style, tileserver_config, StyleDocument, StyleOptions};
use crate::tiling::{TileArchive, TileEmitter};
use crate::zoom_bands::ZoomBandMap;

/// Which optional stages a run performs.
///
/// Catalog lookup, coverage and selection always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stages {
    /// Write per-zoom FeatureCollections for inspection
    pub geojson: bool,
    pub tile: bool,
    pub style: bool,
}

impl Stages {
    pub fn all() -> Self {
        Self {
            geojson: true,
            tile: true,
            style: true,
        }
    }

    fn needs_assembly(&self) -> bool {
        self.geojson || self.tile
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub zoom_bands: ZoomBandMap,
    pub concurrency: usize,
    pub style: StyleOptions,
    /// Style template; the built-in one is used when absent
    pub style_template: Option<StyleDocument>,
    /// Root for geojsons/, styles/ and config.json
    pub output_dir: PathBuf,
    /// Archive file name referenced by the style when tiling is skipped
    pub archive_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            zoom_bands: ZoomBandMap::default(),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            style: StyleOptions::default(),
            style_template: None,
            output_dir: PathBuf::from("mbtiles"),
            archive_name: "enc.mbtiles".to_string(),
        }
    }
}

/// Outcome of a run that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    CompleteWithGaps,
}

impl RunStatus {
    /// Process exit code: 0 without gaps, 2 with gaps.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::CompleteWithGaps => 2,
        }
    }
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bbox: BoundingBox,
    pub status: RunStatus,
    /// Cells intersecting the box
    pub cells_considered: usize,
    pub selection: SelectionSummary,
    /// Uncharted gaps and regions lost to failed conversions
    pub gaps: Vec<GapSummary>,
    pub failed_cells: Vec<CellFailure>,
    pub archive: Option<TileArchive>,
    pub style_path: Option<PathBuf>,
    pub tileserver_config_path: Option<PathBuf>,
    pub geojson_paths: Vec<PathBuf>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }
}

pub struct Pipeline {
    catalog: Arc<dyn CatalogSource>,
    converter: Arc<dyn ChartConverter>,
    tiler: Arc<dyn TileEmitter>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        converter: Arc<dyn ChartConverter>,
        tiler: Arc<dyn TileEmitter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            converter,
            tiler,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolve coverage and select bands without converting anything.
    ///
    /// Returns the selection and the number of cells intersecting `bbox`.
    #[instrument(skip_all, fields(bbox = %bbox))]
    pub async fn plan(&self, bbox: &BoundingBox) -> EncResult<(Selection, usize)> {
        bbox.validate()?;

        let catalog = ChartCatalog::fetch(self.catalog.as_ref(), bbox).await?;
        let cells = catalog.cells_intersecting(bbox);
        if cells.is_empty() {
            warn!("No chart cells intersect the requested box");
        }

        let coverage = resolve_coverage(bbox, &cells);
        let selection = BandSelector::new(self.config.zoom_bands.clone()).select(&coverage);
        Ok((selection, cells.len()))
    }

    /// Run the pipeline for `bbox`.
    ///
    /// Only invalid input, catalog unavailability, tiling failure and
    /// cancellation are errors; conversion failures become gaps.
    #[instrument(skip_all, fields(bbox = %bbox))]
    pub async fn run(
        &self,
        bbox: &BoundingBox,
        stages: Stages,
        cancel: &CancellationToken,
    ) -> EncResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, ?stages, "Starting basemap run");

        let (selection, cells_considered) = self.plan(bbox).await?;
        if cancel.is_cancelled() {
            return Err(EncError::Cancelled);
        }

        let mut gaps: Vec<GapSummary> = selection.gaps().map(|g| g.summary()).collect();
        let mut failed_cells = Vec::new();
        let mut archive = None;
        let mut geojson_paths = Vec::new();

        if stages.needs_assembly() {
            let assembler = GeometryAssembler::new(self.converter.clone(), self.config.concurrency);
            let assembly = assembler.assemble(&selection, cancel).await?;

            gaps = assembly.gaps.iter().map(|g| g.summary()).collect();
            failed_cells = assembly.failures.clone();

            if stages.geojson {
                let dir = self.config.output_dir.join("geojsons");
                tokio::fs::create_dir_all(&dir).await?;
                for (zoom, collection) in &assembly.collections {
                    let path = dir.join(format!("z{:02}.geojson", zoom));
                    write_json(&path, collection).await?;
                    geojson_paths.push(path);
                }
                info!(files = geojson_paths.len(), "Wrote per-zoom GeoJSON");
            }

            if stages.tile {
                let tiles = self.tiler.emit(&assembly).await?;
                info!(
                    path = %tiles.path.display(),
                    features = tiles.feature_count,
                    "Tile archive written"
                );
                archive = Some(tiles);
            }
        }

        let (style_path, tileserver_config_path) = if stages.style {
            let (style, config) = self.write_style(&selection, archive.as_ref()).await?;
            (Some(style), Some(config))
        } else {
            (None, None)
        };

        let status = if gaps.is_empty() && failed_cells.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::CompleteWithGaps
        };

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            bbox: *bbox,
            status,
            cells_considered,
            selection: selection.summary(),
            gaps,
            failed_cells,
            archive,
            style_path,
            tileserver_config_path,
            geojson_paths,
        };

        info!(
            run_id = %run_id,
            status = ?report.status,
            gaps = report.gaps.len(),
            failed_cells = report.failed_cells.len(),
            "Basemap run finished"
        );
        Ok(report)
    }

    async fn write_style(
        &self,
        selection: &Selection,
        archive: Option<&TileArchive>,
    ) -> EncResult<(PathBuf, PathBuf)> {
        let options = &self.config.style;
        let archive_file = archive
            .and_then(|a| a.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.archive_name.clone());

        let template = self
            .config
            .style_template
            .clone()
            .unwrap_or_else(|| default_template(options));
        let style = derive_style(selection, &template, options, &archive_file);

        let styles_dir = self.config.output_dir.join("styles");
        tokio::fs::create_dir_all(&styles_dir).await?;
        let style_path = styles_dir.join(format!("{}.json", options.name));
        write_json(&style_path, &style).await?;

        let config_path = self.config.output_dir.join("config.json");
        write_json(&config_path, &tileserver_config(options, &archive_file)).await?;

        info!(
            style = %style_path.display(),
            layers = style.layers.len(),
            "Style written"
        );
        Ok((style_path, config_path))
    }
}

/// Write JSON through a temporary file so readers never see partial output.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> EncResult<()> {
    let body = serde_json::to_vec(value)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Complete.exit_code(), 0);
        assert_eq!(RunStatus::CompleteWithGaps.exit_code(), 2);
    }

    #[test]
    fn test_stages() {
        assert!(!Stages::default().needs_assembly());
        assert!(Stages { geojson: true, ..Default::default() }.needs_assembly());
        assert!(Stages::all().style);
    }
}
