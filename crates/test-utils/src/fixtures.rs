//! Common test fixtures for ENC basemap tests.
//!
//! Boxes and chart cells for the scenarios the selector has to handle:
//! nested bands, partial coverage, same-band overlaps and empty catalogs.

use enc_common::{BoundingBox, ChartCell, ChartCellDescriptor, UsageBand};

/// Common bounding box definitions for testing, as `[min_x, min_y, max_x, max_y]`.
pub mod bbox {
    /// A one-degree box off the Mississippi delta, covered by a coastal cell
    pub const COASTAL_CELL: [f64; 4] = [-90.0, 20.0, -89.0, 21.0];

    /// A general cell extent that is a strict superset of `COASTAL_CELL`
    pub const GENERAL_CELL: [f64; 4] = [-91.0, 19.0, -88.0, 22.0];

    /// Requested box straddling the coastal cell's eastern edge
    pub const STRADDLING_REQUEST: [f64; 4] = [-89.5, 20.25, -88.5, 20.75];

    /// Open ocean far from any fixture cell
    pub const OPEN_OCEAN: [f64; 4] = [-40.0, 30.0, -39.0, 31.0];

    /// Unit square at the origin
    pub const UNIT: [f64; 4] = [0.0, 0.0, 1.0, 1.0];
}

/// Build a [`BoundingBox`] from a fixture array.
pub fn bbox_of(extent: [f64; 4]) -> BoundingBox {
    BoundingBox::new(extent[0], extent[1], extent[2], extent[3])
}

/// A NOAA-style cell name whose third character encodes `band`.
///
/// ```
/// use enc_common::UsageBand;
/// use test_utils::cell_name;
///
/// assert_eq!(cell_name(UsageBand::Coastal, 7), "US3TST07");
/// ```
pub fn cell_name(band: UsageBand, n: u32) -> String {
    format!("US{}TST{:02}", band.number(), n)
}

/// A chart cell with a rectangular footprint.
pub fn rect_cell(id: &str, band: UsageBand, extent: [f64; 4]) -> ChartCell {
    ChartCell::from_bbox(id, band, bbox_of(extent))
}

/// A rectangular cell with edition and update numbers.
pub fn revised_cell(
    id: &str,
    band: UsageBand,
    extent: [f64; 4],
    edition: u32,
    update: u32,
) -> ChartCell {
    rect_cell(id, band, extent).with_revision(Some(edition), Some(update))
}

/// A catalog descriptor with a bbox footprint and the band left to the name.
pub fn rect_descriptor(id: &str, extent: [f64; 4]) -> ChartCellDescriptor {
    ChartCellDescriptor {
        id: id.to_string(),
        band: None,
        bbox: Some(extent),
        footprint: None,
        edition: None,
        update_sequence: None,
    }
}

/// The nested coastal-inside-general catalog used by the fallback scenario.
pub fn coastal_inside_general() -> Vec<ChartCell> {
    vec![
        rect_cell(&cell_name(UsageBand::Coastal, 1), UsageBand::Coastal, bbox::COASTAL_CELL),
        rect_cell(&cell_name(UsageBand::General, 1), UsageBand::General, bbox::GENERAL_CELL),
    ]
}
