//! Geometry assembly: convert the selected cells and clip their features to
//! the regions each cell is authoritative for, one collection per zoom.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use geo::{BooleanOps, BoundingRect, Intersects, MultiLineString, MultiPolygon, Point};
use metrics::{counter, histogram};
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use enc_common::{
    BoundingBox, ChartCell, EncError, EncResult, Feature, FeatureCollection, Geometry, Position,
    ZoomLevel,
};

use crate::converter::ChartConverter;
use crate::region;
use crate::selector::{
    AssignedRegion, CoverageGap, GapReason, Provenance, Selection, ZoomAssignment,
};

/// Feature tag: id of the cell the geometry came from.
pub const CELL_PROPERTY: &str = "enc_cell";
/// Feature tag: usage band of the source cell.
pub const BAND_PROPERTY: &str = "enc_band";
/// Feature tag: `"native"` or `"fallback"`.
pub const PROVENANCE_PROPERTY: &str = "enc_provenance";
/// Feature tag on fallback features: the band the zoom would natively use.
pub const NATIVE_BAND_PROPERTY: &str = "enc_native_band";

/// Every tag the assembler writes.
pub const SELECTION_PROPERTIES: [&str; 4] = [
    CELL_PROPERTY,
    BAND_PROPERTY,
    PROVENANCE_PROPERTY,
    NATIVE_BAND_PROPERTY,
];

/// A cell whose conversion failed; its regions became gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellFailure {
    pub cell_id: String,
    pub message: String,
}

impl CellFailure {
    pub fn to_error(&self) -> EncError {
        EncError::ConversionFailed {
            cell_id: self.cell_id.clone(),
            message: self.message.clone(),
        }
    }
}

/// Per-zoom feature collections ready for tiling.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub bbox: BoundingBox,
    pub collections: BTreeMap<ZoomLevel, FeatureCollection>,
    /// Failed cells, ordered by id
    pub failures: Vec<CellFailure>,
    /// Uncharted gaps plus regions lost to failed conversions, by zoom
    pub gaps: Vec<CoverageGap>,
}

impl Assembly {
    pub fn feature_count(&self) -> usize {
        self.collections.values().map(FeatureCollection::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_count() == 0
    }

    pub fn min_zoom(&self) -> Option<ZoomLevel> {
        self.collections.keys().next().copied()
    }

    pub fn max_zoom(&self) -> Option<ZoomLevel> {
        self.collections.keys().next_back().copied()
    }
}

/// Fetches GeoJSON for selected cells and merges it per zoom.
pub struct GeometryAssembler {
    converter: Arc<dyn ChartConverter>,
    concurrency: usize,
}

impl GeometryAssembler {
    pub fn new(converter: Arc<dyn ChartConverter>, concurrency: usize) -> Self {
        Self {
            converter,
            concurrency: concurrency.max(1),
        }
    }

    /// Convert every cell the selection references, then clip per zoom.
    ///
    /// Conversion failures are recovered by turning the failed cell's regions
    /// into gaps. Cancellation stops new conversions from starting; in-flight
    /// ones finish and the call returns [`EncError::Cancelled`].
    #[instrument(skip_all, fields(bbox = %selection.bbox()))]
    pub async fn assemble(
        &self,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> EncResult<Assembly> {
        let cells = selection.cells();
        info!(cells = cells.len(), concurrency = self.concurrency, "Converting chart cells");

        let converted = self.convert_all(cells, cancel).await;
        if cancel.is_cancelled() {
            warn!("Assembly cancelled, discarding partial conversions");
            return Err(EncError::Cancelled);
        }

        let mut sources: BTreeMap<String, Arc<FeatureCollection>> = BTreeMap::new();
        let mut failures = Vec::new();
        for (cell_id, result) in converted {
            match result {
                Ok(collection) => {
                    sources.insert(cell_id, Arc::new(collection));
                }
                Err(message) => {
                    let failure = CellFailure { cell_id, message };
                    let err = failure.to_error();
                    error!(cell = %failure.cell_id, code = err.code(), error = %err, "Chart conversion failed");
                    failures.push(failure);
                }
            }
        }

        let assignments: Vec<&ZoomAssignment> = selection.assignments().collect();
        let clipped: Vec<(ZoomLevel, FeatureCollection, Vec<CoverageGap>)> = assignments
            .par_iter()
            .map(|assignment| clip_assignment(assignment, &sources))
            .collect();

        let mut collections = BTreeMap::new();
        let mut gaps = Vec::new();
        for (zoom, collection, failed_regions) in clipped {
            debug!(zoom = zoom, features = collection.len(), "Zoom assembled");
            collections.insert(zoom, collection);
            if let Some(assignment) = selection.get(zoom) {
                gaps.extend(assignment.gaps.iter().cloned());
            }
            gaps.extend(failed_regions);
        }

        let assembly = Assembly {
            bbox: *selection.bbox(),
            collections,
            failures,
            gaps,
        };
        info!(
            features = assembly.feature_count(),
            failed_cells = assembly.failures.len(),
            gaps = assembly.gaps.len(),
            "Assembly complete"
        );
        Ok(assembly)
    }

    /// Results keyed by cell id; errors are flattened to messages.
    async fn convert_all(
        &self,
        cells: Vec<Arc<ChartCell>>,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, Result<FeatureCollection, String>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let tasks = cells.into_iter().map(|cell| {
            let sem = semaphore.clone();
            let converter = self.converter.clone();
            let cancel = cancel.clone();

            async move {
                let _permit = sem.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    debug!(cell = %cell.id, "Skipping conversion after cancellation");
                    return None;
                }

                let start = Instant::now();
                let result = converter.convert(&cell).await;
                histogram!("enc_conversion_duration_seconds").record(start.elapsed().as_secs_f64());

                match &result {
                    Ok(collection) => {
                        counter!("enc_cells_converted_total").increment(1);
                        debug!(cell = %cell.id, features = collection.len(), "Cell converted");
                    }
                    Err(_) => counter!("enc_cells_failed_total").increment(1),
                }
                Some((cell.id.clone(), result.map_err(|e| e.to_string())))
            }
        });

        stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .filter_map(|r| async move { r })
            .collect()
            .await
    }
}

fn clip_assignment(
    assignment: &ZoomAssignment,
    sources: &BTreeMap<String, Arc<FeatureCollection>>,
) -> (ZoomLevel, FeatureCollection, Vec<CoverageGap>) {
    let mut features = Vec::new();
    let mut gaps = Vec::new();

    for region in &assignment.regions {
        match sources.get(region.cell_id()) {
            Some(source) => features.extend(clip_features(source, region)),
            None => gaps.push(CoverageGap {
                zoom: assignment.zoom,
                region: region.region.clone(),
                reason: GapReason::ConversionFailed {
                    cell_id: region.cell_id().to_string(),
                },
            }),
        }
    }

    (
        assignment.zoom,
        FeatureCollection::new().with_features(features),
        gaps,
    )
}

/// Clip a cell's features to one assigned region and tag them.
pub fn clip_features(source: &FeatureCollection, assigned: &AssignedRegion) -> Vec<Feature> {
    let Some(envelope) = assigned.region.bounding_rect() else {
        return Vec::new();
    };

    source
        .features
        .iter()
        .filter_map(|feature| {
            let geometry = feature.geometry.as_ref()?;
            let bounds = geometry.to_geo().and_then(|g| g.bounding_rect())?;
            if !bounds.intersects(&envelope) {
                return None;
            }

            let clipped = clip_geometry(geometry, &assigned.region)?;
            let mut out = feature.clone();
            out.geometry = Some(clipped);
            out.set_property(CELL_PROPERTY, assigned.cell_id());
            out.set_property(BAND_PROPERTY, assigned.band.as_str());
            out.set_property(PROVENANCE_PROPERTY, assigned.provenance.kind());
            if let Provenance::Fallback { native_band, .. } = assigned.provenance {
                out.set_property(NATIVE_BAND_PROPERTY, native_band.as_str());
            }
            Some(out)
        })
        .collect()
}

/// Restrict a geometry to `region`; `None` when nothing is left.
///
/// Points are kept or dropped whole so their extra ordinates survive;
/// lines and polygons already inside the region are returned untouched.
pub fn clip_geometry(geometry: &Geometry, region: &MultiPolygon<f64>) -> Option<Geometry> {
    match geometry {
        Geometry::Point { coordinates } => {
            position_inside(coordinates, region).then(|| geometry.clone())
        }
        Geometry::MultiPoint { coordinates } => {
            let kept: Vec<Position> = coordinates
                .iter()
                .filter(|p| position_inside(p, region))
                .cloned()
                .collect();
            (!kept.is_empty()).then_some(Geometry::MultiPoint { coordinates: kept })
        }
        Geometry::GeometryCollection { geometries } => {
            let kept: Vec<Geometry> = geometries
                .iter()
                .filter_map(|g| clip_geometry(g, region))
                .collect();
            (!kept.is_empty()).then_some(Geometry::GeometryCollection { geometries: kept })
        }
        _ => {
            let shape = geometry.to_geo()?;
            if inside(&shape, region) {
                return Some(geometry.clone());
            }
            match shape {
                geo::Geometry::LineString(line) => clip_lines(&MultiLineString::new(vec![line]), region),
                geo::Geometry::MultiLineString(lines) => clip_lines(&lines, region),
                geo::Geometry::Polygon(polygon) => {
                    clip_polygons(&MultiPolygon::new(vec![polygon]), region)
                }
                geo::Geometry::MultiPolygon(polygons) => clip_polygons(&polygons, region),
                _ => None,
            }
        }
    }
}

fn position_inside(position: &Position, region: &MultiPolygon<f64>) -> bool {
    match position.as_slice() {
        [x, y, ..] => region.intersects(&Point::new(*x, *y)),
        _ => false,
    }
}

/// Envelope strictly inside the region, so clipping would be a no-op.
fn inside(shape: &geo::Geometry<f64>, region: &MultiPolygon<f64>) -> bool {
    match shape.bounding_rect() {
        Some(rect) if rect.width() > 0.0 && rect.height() > 0.0 => {
            region::covers(region, &MultiPolygon::new(vec![rect.to_polygon()]))
        }
        _ => false,
    }
}

fn clip_lines(lines: &MultiLineString<f64>, region: &MultiPolygon<f64>) -> Option<Geometry> {
    let clipped = region.clip(lines, false);
    let parts: Vec<_> = clipped.0.into_iter().filter(|l| l.0.len() >= 2).collect();
    if parts.is_empty() {
        return None;
    }
    Some(Geometry::from_geo(&geo::Geometry::MultiLineString(
        MultiLineString::new(parts),
    )))
}

fn clip_polygons(polygons: &MultiPolygon<f64>, region: &MultiPolygon<f64>) -> Option<Geometry> {
    let clipped = region::intersection(polygons, region);
    if clipped.0.is_empty() {
        return None;
    }
    Some(Geometry::from_geo(&geo::Geometry::MultiPolygon(clipped)))
}
