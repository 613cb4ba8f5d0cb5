//! Band selection and multi-resolution zoom fill.
//!
//! For every zoom level in the [`ZoomBandMap`] the selector decides which
//! cell is authoritative for which part of the requested box. The native band
//! for the zoom is used where it has coverage; the rest of the box is filled
//! from the more general bands first, nearest first, and only then from the
//! more detailed ones. Whatever no band covers is reported as a
//! [`CoverageGap`].
//!
//! The selector is a pure function of its inputs: identical coverage and
//! policy always yield an identical [`Selection`].

use std::collections::BTreeMap;
use std::sync::Arc;

use geo::{Area, MultiPolygon};
use serde::Serialize;
use tracing::{debug, info, warn};

use enc_common::{BoundingBox, ChartCell, Geometry, UsageBand, ZoomLevel};

use crate::coverage::CoverageMap;
use crate::region;
use crate::zoom_bands::ZoomBandMap;

/// Where a region's geometry comes from relative to its zoom's native band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provenance {
    Native,
    Fallback {
        native_band: UsageBand,
        source_band: UsageBand,
    },
}

impl Provenance {
    fn for_band(native_band: UsageBand, source_band: UsageBand) -> Self {
        if native_band == source_band {
            Provenance::Native
        } else {
            Provenance::Fallback {
                native_band,
                source_band,
            }
        }
    }

    /// `"native"` or `"fallback"`, as written into feature tags.
    pub fn kind(&self) -> &'static str {
        match self {
            Provenance::Native => "native",
            Provenance::Fallback { .. } => "fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Provenance::Fallback { .. })
    }
}

/// A part of the box one cell is authoritative for at one zoom.
#[derive(Debug, Clone)]
pub struct AssignedRegion {
    pub cell: Arc<ChartCell>,
    /// Band the geometry is taken from (always the cell's band)
    pub band: UsageBand,
    pub provenance: Provenance,
    pub region: MultiPolygon<f64>,
}

impl AssignedRegion {
    pub fn cell_id(&self) -> &str {
        &self.cell.id
    }
}

/// Why part of the box has no geometry at a zoom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapReason {
    /// No cell of any band covers the area.
    Uncharted,
    /// The authoritative cell could not be converted.
    ConversionFailed { cell_id: String },
}

/// A sub-region of the box that receives no geometry at `zoom`.
///
/// Gaps are structured warnings carried in the run result, not errors.
#[derive(Debug, Clone)]
pub struct CoverageGap {
    pub zoom: ZoomLevel,
    pub region: MultiPolygon<f64>,
    pub reason: GapReason,
}

impl CoverageGap {
    pub fn summary(&self) -> GapSummary {
        GapSummary {
            zoom: self.zoom,
            reason: self.reason.clone(),
            area: self.region.unsigned_area(),
            geometry: region_geometry(&self.region),
        }
    }
}

/// Assignment of the whole box for a single zoom level.
#[derive(Debug, Clone)]
pub struct ZoomAssignment {
    pub zoom: ZoomLevel,
    pub native_band: UsageBand,
    /// Pairwise disjoint, in search order then cell precedence
    pub regions: Vec<AssignedRegion>,
    pub gaps: Vec<CoverageGap>,
}

impl ZoomAssignment {
    /// Union of every assigned region.
    pub fn assigned_region(&self) -> MultiPolygon<f64> {
        self.regions
            .iter()
            .fold(region::empty(), |acc, r| region::union(&acc, &r.region))
    }

    pub fn has_fallback(&self) -> bool {
        self.regions.iter().any(|r| r.provenance.is_fallback())
    }
}

/// Per-zoom assignments for one requested box.
#[derive(Debug, Clone)]
pub struct Selection {
    bbox: BoundingBox,
    assignments: BTreeMap<ZoomLevel, ZoomAssignment>,
}

impl Selection {
    pub fn new(bbox: BoundingBox, assignments: BTreeMap<ZoomLevel, ZoomAssignment>) -> Self {
        Self { bbox, assignments }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn get(&self, zoom: ZoomLevel) -> Option<&ZoomAssignment> {
        self.assignments.get(&zoom)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &ZoomAssignment> {
        self.assignments.values()
    }

    pub fn zoom_levels(&self) -> impl Iterator<Item = ZoomLevel> + '_ {
        self.assignments.keys().copied()
    }

    /// Every gap across every zoom, ascending by zoom.
    pub fn gaps(&self) -> impl Iterator<Item = &CoverageGap> {
        self.assignments.values().flat_map(|a| a.gaps.iter())
    }

    pub fn has_gaps(&self) -> bool {
        self.gaps().next().is_some()
    }

    /// Distinct cells referenced by any zoom, ordered by id.
    pub fn cells(&self) -> Vec<Arc<ChartCell>> {
        let mut by_id: BTreeMap<&str, &Arc<ChartCell>> = BTreeMap::new();
        for assignment in self.assignments.values() {
            for region in &assignment.regions {
                by_id.entry(region.cell_id()).or_insert(&region.cell);
            }
        }
        by_id.into_values().cloned().collect()
    }

    pub fn summary(&self) -> SelectionSummary {
        SelectionSummary {
            bbox: self.bbox,
            zooms: self
                .assignments
                .values()
                .map(|a| ZoomSummary {
                    zoom: a.zoom,
                    native_band: a.native_band,
                    regions: a
                        .regions
                        .iter()
                        .map(|r| RegionSummary {
                            cell_id: r.cell.id.clone(),
                            band: r.band,
                            provenance: r.provenance,
                            area: r.region.unsigned_area(),
                            geometry: region_geometry(&r.region),
                        })
                        .collect(),
                    gaps: a.gaps.iter().map(CoverageGap::summary).collect(),
                })
                .collect(),
        }
    }
}

/// Serializable view of a [`Selection`], printed by `--plan` and kept in
/// the run report.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionSummary {
    pub bbox: BoundingBox,
    pub zooms: Vec<ZoomSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoomSummary {
    pub zoom: ZoomLevel,
    pub native_band: UsageBand,
    pub regions: Vec<RegionSummary>,
    pub gaps: Vec<GapSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub cell_id: String,
    pub band: UsageBand,
    pub provenance: Provenance,
    pub area: f64,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapSummary {
    pub zoom: ZoomLevel,
    pub reason: GapReason,
    pub area: f64,
    pub geometry: Geometry,
}

fn region_geometry(region: &MultiPolygon<f64>) -> Geometry {
    Geometry::from_geo(&geo::Geometry::MultiPolygon(region.clone()))
}

/// Regions and residual computed for one native band.
struct BandFill {
    regions: Vec<AssignedRegion>,
    residual: MultiPolygon<f64>,
}

/// Combines coverage with a zoom policy into per-zoom assignments.
#[derive(Debug, Clone)]
pub struct BandSelector {
    zoom_bands: ZoomBandMap,
}

impl BandSelector {
    pub fn new(zoom_bands: ZoomBandMap) -> Self {
        Self { zoom_bands }
    }

    pub fn zoom_bands(&self) -> &ZoomBandMap {
        &self.zoom_bands
    }

    /// Assign every zoom of the policy over `coverage.bbox()`.
    pub fn select(&self, coverage: &CoverageMap) -> Selection {
        let mut fills: BTreeMap<UsageBand, BandFill> = BTreeMap::new();
        let mut assignments = BTreeMap::new();

        for zoom in self.zoom_bands.zoom_levels() {
            let Some(native_band) = self.zoom_bands.native_band(zoom) else {
                continue;
            };

            // Every zoom in a native band's range gets the same fill.
            let fill = fills
                .entry(native_band)
                .or_insert_with(|| fill_for_band(coverage, native_band));

            let gaps = if region::is_negligible(&fill.residual) {
                Vec::new()
            } else {
                vec![CoverageGap {
                    zoom,
                    region: fill.residual.clone(),
                    reason: GapReason::Uncharted,
                }]
            };

            debug!(
                zoom = zoom,
                native_band = %native_band,
                regions = fill.regions.len(),
                gaps = gaps.len(),
                "Zoom assigned"
            );

            assignments.insert(
                zoom,
                ZoomAssignment {
                    zoom,
                    native_band,
                    regions: fill.regions.clone(),
                    gaps,
                },
            );
        }

        let selection = Selection::new(*coverage.bbox(), assignments);
        let gap_count = selection.gaps().count();
        if gap_count > 0 {
            warn!(gaps = gap_count, bbox = %coverage.bbox(), "Selection leaves uncharted gaps");
        }
        info!(
            zooms = selection.assignments.len(),
            cells = selection.cells().len(),
            gaps = gap_count,
            "Band selection complete"
        );
        selection
    }
}

fn fill_for_band(coverage: &CoverageMap, native_band: UsageBand) -> BandFill {
    let bbox_region = coverage.bbox().to_multi_polygon();

    if coverage.covers_bbox(native_band) {
        let regions = coverage
            .get(native_band)
            .cells()
            .iter()
            .map(|part| AssignedRegion {
                cell: Arc::clone(&part.cell),
                band: native_band,
                provenance: Provenance::Native,
                region: part.region.clone(),
            })
            .collect();
        return BandFill {
            regions,
            residual: region::empty(),
        };
    }

    let mut residual = bbox_region;
    let mut regions = Vec::new();

    for band in native_band.search_order() {
        if region::is_negligible(&residual) {
            break;
        }
        let Some(band_region) = coverage.get(band).region() else {
            continue;
        };

        let claim = region::intersection(&residual, band_region);
        if region::is_negligible(&claim) {
            continue;
        }

        let provenance = Provenance::for_band(native_band, band);
        for part in coverage.get(band).cells() {
            let piece = region::intersection(&part.region, &claim);
            if region::is_negligible(&piece) {
                continue;
            }
            regions.push(AssignedRegion {
                cell: Arc::clone(&part.cell),
                band,
                provenance,
                region: piece,
            });
        }

        residual = region::difference(&residual, &claim);
    }

    BandFill {
        regions,
        residual: if region::is_negligible(&residual) {
            region::empty()
        } else {
            residual
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::resolve_coverage;
    use enc_common::ZoomRange;

    fn cell(id: &str, band: UsageBand, bbox: BoundingBox) -> Arc<ChartCell> {
        Arc::new(ChartCell::from_bbox(id, band, bbox))
    }

    fn coastal_only_policy() -> ZoomBandMap {
        ZoomBandMap::new(vec![(UsageBand::Coastal, ZoomRange::single(10))]).unwrap()
    }

    #[test]
    fn test_native_full_coverage_uses_partition_directly() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let cells = vec![cell("US3AAA01", UsageBand::Coastal, BoundingBox::new(-1.0, -1.0, 2.0, 2.0))];
        let coverage = resolve_coverage(&bbox, &cells);
        let selection = BandSelector::new(coastal_only_policy()).select(&coverage);

        let zoom = selection.get(10).unwrap();
        assert_eq!(zoom.regions.len(), 1);
        assert_eq!(zoom.regions[0].provenance, Provenance::Native);
        assert!(zoom.gaps.is_empty());
    }

    #[test]
    fn test_provenance_kind_strings() {
        assert_eq!(Provenance::Native.kind(), "native");
        let fallback = Provenance::for_band(UsageBand::Coastal, UsageBand::General);
        assert_eq!(fallback.kind(), "fallback");
        assert!(fallback.is_fallback());
        assert_eq!(Provenance::for_band(UsageBand::Harbor, UsageBand::Harbor), Provenance::Native);
    }

    #[test]
    fn test_detailed_band_used_when_nothing_general_exists() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let cells = vec![cell("US5AAA01", UsageBand::Harbor, bbox)];
        let coverage = resolve_coverage(&bbox, &cells);
        let selection = BandSelector::new(coastal_only_policy()).select(&coverage);

        let zoom = selection.get(10).unwrap();
        assert_eq!(zoom.regions.len(), 1);
        assert_eq!(
            zoom.regions[0].provenance,
            Provenance::Fallback {
                native_band: UsageBand::Coastal,
                source_band: UsageBand::Harbor,
            }
        );
    }

    #[test]
    fn test_distant_general_band_beats_nearer_detailed_band() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let cells = vec![
            cell("US1AAA01", UsageBand::Overview, bbox),
            cell("US4AAA01", UsageBand::Approach, bbox),
        ];
        let coverage = resolve_coverage(&bbox, &cells);
        let selection = BandSelector::new(coastal_only_policy()).select(&coverage);

        let zoom = selection.get(10).unwrap();
        assert_eq!(zoom.regions.len(), 1);
        assert_eq!(zoom.regions[0].band, UsageBand::Overview);
    }

    #[test]
    fn test_uncovered_area_is_a_gap() {
        let bbox = BoundingBox::new(0.0, 0.0, 2.0, 1.0);
        let cells = vec![cell("US3AAA01", UsageBand::Coastal, BoundingBox::new(0.0, 0.0, 1.0, 1.0))];
        let coverage = resolve_coverage(&bbox, &cells);
        let selection = BandSelector::new(coastal_only_policy()).select(&coverage);

        let gaps: Vec<_> = selection.gaps().collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].reason, GapReason::Uncharted);
        assert!((gaps[0].region.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_serializes_provenance_tags() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let cells = vec![cell("US2AAA01", UsageBand::General, bbox)];
        let coverage = resolve_coverage(&bbox, &cells);
        let selection = BandSelector::new(coastal_only_policy()).select(&coverage);

        let json = serde_json::to_value(selection.summary()).unwrap();
        let region = &json["zooms"][0]["regions"][0];
        assert_eq!(region["cell_id"], "US2AAA01");
        assert_eq!(region["provenance"]["kind"], "fallback");
        assert_eq!(region["provenance"]["source_band"], "general");
    }
}
