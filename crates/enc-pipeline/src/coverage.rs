//! Per-band coverage of the requested bounding box.
//!
//! For every usage band the resolver records either the exact sub-region of
//! the box its cells cover, or an explicit `Absent` marker. Inside a band the
//! covered region is further partitioned between cells by precedence, so
//! overlapping same-band cells never both author the same area.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use geo::{Area, MultiPolygon};
use tracing::debug;

use enc_common::{BoundingBox, ChartCell, UsageBand};

use crate::region;

/// The part of a band's coverage one cell is authoritative for.
#[derive(Debug, Clone)]
pub struct CellRegion {
    pub cell: Arc<ChartCell>,
    pub region: MultiPolygon<f64>,
}

/// Coverage of a single band inside the requested box.
#[derive(Debug, Clone)]
pub enum BandCoverage {
    /// No cell of this band touches the box.
    Absent,
    Present {
        /// Union of the band's clipped footprints
        region: MultiPolygon<f64>,
        /// Disjoint per-cell partition of `region`, highest precedence first
        cells: Vec<CellRegion>,
    },
}

impl BandCoverage {
    pub fn region(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            BandCoverage::Absent => None,
            BandCoverage::Present { region, .. } => Some(region),
        }
    }

    pub fn cells(&self) -> &[CellRegion] {
        match self {
            BandCoverage::Absent => &[],
            BandCoverage::Present { cells, .. } => cells,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, BandCoverage::Absent)
    }
}

static ABSENT: BandCoverage = BandCoverage::Absent;

/// Coverage for every band, keyed in band order.
#[derive(Debug, Clone)]
pub struct CoverageMap {
    bbox: BoundingBox,
    bands: BTreeMap<UsageBand, BandCoverage>,
}

impl CoverageMap {
    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Coverage for `band`; every band has an entry.
    pub fn get(&self, band: UsageBand) -> &BandCoverage {
        self.bands.get(&band).unwrap_or(&ABSENT)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UsageBand, &BandCoverage)> {
        self.bands.iter().map(|(band, coverage)| (*band, coverage))
    }

    /// Whether `band` covers the entire requested box.
    pub fn covers_bbox(&self, band: UsageBand) -> bool {
        self.get(band)
            .region()
            .map(|r| region::covers(r, &self.bbox.to_multi_polygon()))
            .unwrap_or(false)
    }

    /// True when no band has any coverage at all.
    pub fn is_uncharted(&self) -> bool {
        self.bands.values().all(BandCoverage::is_absent)
    }

    /// Fraction of the box covered by `band`, in `[0, 1]`.
    pub fn coverage_fraction(&self, band: UsageBand) -> f64 {
        let area = self
            .get(band)
            .region()
            .map(|r| r.unsigned_area())
            .unwrap_or(0.0);
        (area / self.bbox.area()).clamp(0.0, 1.0)
    }
}

/// Ordering of two same-band cells: the first sorts ahead and wins overlaps.
///
/// Newer `(edition, update)` wins; cells without revision information lose
/// to any that have it. Then the smaller footprint wins, then the lower id.
pub fn cell_precedence(a: &ChartCell, b: &ChartCell) -> Ordering {
    b.revision()
        .cmp(&a.revision())
        .then_with(|| a.area().total_cmp(&b.area()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Compute coverage of `bbox` for every band from the intersecting `cells`.
pub fn resolve_coverage(bbox: &BoundingBox, cells: &[Arc<ChartCell>]) -> CoverageMap {
    let bbox_region = bbox.to_multi_polygon();

    let mut by_band: BTreeMap<UsageBand, Vec<Arc<ChartCell>>> = BTreeMap::new();
    for cell in cells {
        by_band.entry(cell.band).or_default().push(Arc::clone(cell));
    }

    let mut bands = BTreeMap::new();
    for band in UsageBand::ALL {
        let mut band_cells = by_band.remove(&band).unwrap_or_default();
        band_cells.sort_by(|a, b| cell_precedence(a, b));

        let coverage = partition_band(&bbox_region, band_cells);
        match &coverage {
            BandCoverage::Absent => debug!(band = %band, "Band absent from requested box"),
            BandCoverage::Present { region, cells } => debug!(
                band = %band,
                cells = cells.len(),
                area = region.unsigned_area(),
                "Band coverage resolved"
            ),
        }
        bands.insert(band, coverage);
    }

    CoverageMap { bbox: *bbox, bands }
}

fn partition_band(bbox_region: &MultiPolygon<f64>, cells: Vec<Arc<ChartCell>>) -> BandCoverage {
    let mut claimed = region::empty();
    let mut parts = Vec::new();

    for cell in cells {
        let clipped = region::intersection(&cell.footprint, bbox_region);
        let own = region::difference(&clipped, &claimed);
        if region::is_negligible(&own) {
            debug!(cell = %cell.id, "Cell fully shadowed by higher-precedence cells");
            continue;
        }
        claimed = region::union(&claimed, &own);
        parts.push(CellRegion { cell, region: own });
    }

    if parts.is_empty() {
        BandCoverage::Absent
    } else {
        BandCoverage::Present {
            region: claimed,
            cells: parts,
        }
    }
}
