//! Chart cells and the catalog descriptors they are built from.

use geo::{Area, BoundingRect, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::band::UsageBand;
use crate::bbox::BoundingBox;
use crate::geojson::Geometry;

/// A single published ENC cell.
///
/// Built once from catalog results and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartCell {
    /// NOAA cell name, e.g. `US5MA11M`
    pub id: String,
    pub band: UsageBand,
    /// Coverage footprint in lon/lat degrees
    pub footprint: MultiPolygon<f64>,
    pub edition: Option<u32>,
    pub update_sequence: Option<u32>,
}

impl ChartCell {
    pub fn new(id: impl Into<String>, band: UsageBand, footprint: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            band,
            footprint,
            edition: None,
            update_sequence: None,
        }
    }

    /// A cell whose footprint is an axis-aligned box.
    pub fn from_bbox(id: impl Into<String>, band: UsageBand, bbox: BoundingBox) -> Self {
        Self::new(id, band, bbox.to_multi_polygon())
    }

    pub fn with_revision(mut self, edition: Option<u32>, update_sequence: Option<u32>) -> Self {
        self.edition = edition;
        self.update_sequence = update_sequence;
        self
    }

    /// `(edition, update)` when the catalog reported either value.
    pub fn revision(&self) -> Option<(u32, u32)> {
        if self.edition.is_none() && self.update_sequence.is_none() {
            return None;
        }
        Some((
            self.edition.unwrap_or(0),
            self.update_sequence.unwrap_or(0),
        ))
    }

    /// Planar footprint area in square degrees.
    pub fn area(&self) -> f64 {
        self.footprint.unsigned_area()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.footprint.bounding_rect().map(BoundingBox::from_rect)
    }

    /// Cheap envelope test used before any polygon work.
    pub fn envelope_intersects(&self, bbox: &BoundingBox) -> bool {
        self.bounding_box()
            .map(|envelope| envelope.intersects(bbox))
            .unwrap_or(false)
    }
}

/// Band as it appears in a catalog record: a NOAA number or a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BandField {
    Number(u8),
    Name(String),
}

/// A raw chart cell record as returned by the catalog source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartCellDescriptor {
    pub id: String,

    /// Explicit band; when absent the band is read from the cell name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<BandField>,

    /// Envelope as `[min_lon, min_lat, max_lon, max_lat]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,

    /// Exact coverage polygon, preferred over `bbox` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint: Option<Geometry>,

    #[serde(default, alias = "edtn", skip_serializing_if = "Option::is_none")]
    pub edition: Option<u32>,

    #[serde(default, alias = "updn", skip_serializing_if = "Option::is_none")]
    pub update_sequence: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Cell {0} has no usable band")]
    MissingBand(String),

    #[error("Cell {0} has neither a footprint nor a bbox")]
    MissingFootprint(String),

    #[error("Cell {id} has an invalid footprint: {reason}")]
    InvalidFootprint { id: String, reason: String },
}

impl ChartCellDescriptor {
    pub fn resolve_band(&self) -> Option<UsageBand> {
        match &self.band {
            Some(BandField::Number(n)) => UsageBand::from_number(*n),
            Some(BandField::Name(name)) => name.parse().ok(),
            None => UsageBand::from_cell_name(&self.id),
        }
    }

    /// Normalize the record into an immutable [`ChartCell`].
    pub fn into_cell(self) -> Result<ChartCell, DescriptorError> {
        let band = self
            .resolve_band()
            .ok_or_else(|| DescriptorError::MissingBand(self.id.clone()))?;

        let footprint = match (&self.footprint, &self.bbox) {
            (Some(geometry), _) => footprint_from_geometry(&self.id, geometry)?,
            (None, Some([min_x, min_y, max_x, max_y])) => {
                let bbox = BoundingBox::new(*min_x, *min_y, *max_x, *max_y);
                bbox.validate()
                    .map_err(|e| DescriptorError::InvalidFootprint {
                        id: self.id.clone(),
                        reason: e.to_string(),
                    })?;
                bbox.to_multi_polygon()
            }
            (None, None) => return Err(DescriptorError::MissingFootprint(self.id.clone())),
        };

        if !(footprint.unsigned_area() > 0.0) {
            return Err(DescriptorError::InvalidFootprint {
                id: self.id,
                reason: "footprint has zero area".to_string(),
            });
        }

        Ok(ChartCell {
            id: self.id,
            band,
            footprint,
            edition: self.edition,
            update_sequence: self.update_sequence,
        })
    }
}

fn footprint_from_geometry(
    id: &str,
    geometry: &Geometry,
) -> Result<MultiPolygon<f64>, DescriptorError> {
    let invalid = |reason: &str| DescriptorError::InvalidFootprint {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if !geometry.is_well_formed() {
        return Err(invalid("malformed coordinates"));
    }

    match geometry.to_geo() {
        Some(geo::Geometry::Polygon(p)) => Ok(MultiPolygon::new(vec![p])),
        Some(geo::Geometry::MultiPolygon(mp)) => Ok(mp),
        Some(_) => Err(invalid(&format!(
            "expected Polygon or MultiPolygon, got {}",
            geometry.type_name()
        ))),
        None => Err(invalid("malformed coordinates")),
    }
}
