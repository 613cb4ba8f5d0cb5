//! Common test collaborators for enc-pipeline integration tests.
//!
//! Provides:
//! - A scripted chart converter with failure injection and call accounting
//! - A tile emitter that records what it was given
//! - Helpers for building catalogs and pipelines from plain cells

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use enc_common::chart::BandField;
use enc_common::{
    BoundingBox, ChartCell, ChartCellDescriptor, EncError, EncResult, FeatureCollection, Geometry,
};
use enc_pipeline::tiling::write_empty_mbtiles;
use enc_pipeline::{
    Assembly, CatalogSource, ChartConverter, ConversionError, Pipeline, PipelineConfig,
    StaticCatalog, TileArchive, TileEmitter,
};
use test_utils::cell_features;

/// Converter returning canned features per cell.
pub struct MockConverter {
    features: BTreeMap<String, FeatureCollection>,
    failing: BTreeSet<String>,
    delay: Duration,
    cancel_on_call: Option<CancellationToken>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockConverter {
    /// Synthetic land, contour and sounding features spanning each cell.
    pub fn for_cells(cells: &[ChartCell]) -> Self {
        let features = cells
            .iter()
            .map(|cell| {
                let extent = cell.bounding_box().expect("fixture cell has a footprint");
                (cell.id.clone(), cell_features(extent.to_array(), &cell.id))
            })
            .collect();
        Self::with_features(features)
    }

    pub fn with_features(features: BTreeMap<String, FeatureCollection>) -> Self {
        Self {
            features,
            failing: BTreeSet::new(),
            delay: Duration::ZERO,
            cancel_on_call: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, cell_id: &str) -> Self {
        self.failing.insert(cell_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` as soon as the first conversion starts.
    pub fn cancel_on_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChartConverter for MockConverter {
    async fn convert(&self, cell: &ChartCell) -> Result<FeatureCollection, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&cell.id) {
            return Err(ConversionError::Tool {
                program: "mock-ogr2ogr".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("corrupt cell {}", cell.id),
            });
        }
        Ok(self.features.get(&cell.id).cloned().unwrap_or_default())
    }
}

/// Tile emitter that keeps every assembly it receives.
///
/// Empty assemblies get a real empty MBTiles archive so callers can inspect
/// it; otherwise nothing is written.
pub struct RecordingTiler {
    output: PathBuf,
    assemblies: Mutex<Vec<Assembly>>,
}

impl RecordingTiler {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            assemblies: Mutex::new(Vec::new()),
        }
    }

    pub fn assemblies(&self) -> Vec<Assembly> {
        self.assemblies.lock().unwrap().clone()
    }
}

#[async_trait]
impl TileEmitter for RecordingTiler {
    async fn emit(&self, assembly: &Assembly) -> EncResult<TileArchive> {
        self.assemblies.lock().unwrap().push(assembly.clone());

        let min_zoom = assembly.min_zoom().unwrap_or(0);
        let max_zoom = assembly.max_zoom().unwrap_or(0);
        if assembly.is_empty() {
            write_empty_mbtiles(&self.output, "test", &assembly.bbox, min_zoom, max_zoom).await?;
        }
        Ok(TileArchive {
            path: self.output.clone(),
            min_zoom,
            max_zoom,
            feature_count: assembly.feature_count(),
            layers: Vec::new(),
        })
    }
}

/// Catalog source that is never reachable.
pub struct UnreachableCatalog;

#[async_trait]
impl CatalogSource for UnreachableCatalog {
    async fn query(&self, _bbox: &BoundingBox) -> EncResult<Vec<ChartCellDescriptor>> {
        Err(EncError::CatalogUnavailable("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}

/// Catalog descriptor carrying a cell's exact footprint and revision.
pub fn descriptor_for(cell: &ChartCell) -> ChartCellDescriptor {
    ChartCellDescriptor {
        id: cell.id.clone(),
        band: Some(BandField::Name(cell.band.as_str().to_string())),
        bbox: None,
        footprint: Some(Geometry::from_geo(&geo::Geometry::MultiPolygon(
            cell.footprint.clone(),
        ))),
        edition: cell.edition,
        update_sequence: cell.update_sequence,
    }
}

pub fn static_catalog(cells: &[ChartCell]) -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::new(cells.iter().map(descriptor_for).collect()))
}

pub fn pipeline_config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        concurrency: 4,
        output_dir: output_dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

/// Pipeline over static `cells` with the given collaborators.
pub fn pipeline(
    cells: &[ChartCell],
    converter: Arc<dyn ChartConverter>,
    tiler: Arc<dyn TileEmitter>,
    output_dir: &Path,
) -> Pipeline {
    Pipeline::new(
        static_catalog(cells),
        converter,
        tiler,
        pipeline_config(output_dir),
    )
}
