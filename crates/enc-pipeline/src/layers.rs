//! S-57 object classes extracted from each chart cell.

use serde::{Deserialize, Serialize};

use crate::assembler::SELECTION_PROPERTIES;

/// Geometry family of a chart layer; drives converter and tiler flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerGeometry {
    Point,
    Line,
    Polygon,
}

/// One S-57 object class (for example `LNDARE`) to pull out of each cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub geometry: LayerGeometry,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, geometry: LayerGeometry) -> Self {
        Self {
            name: name.into(),
            geometry,
        }
    }

    /// Value for `ogr2ogr -nlt`.
    pub fn ogr_type(&self) -> &'static str {
        match self.geometry {
            LayerGeometry::Point => "POINT25D",
            LayerGeometry::Line => "MULTILINESTRING",
            LayerGeometry::Polygon => "MULTIPOLYGON",
        }
    }

    /// Layer specific `tippecanoe` flags.
    ///
    /// Soundings are clustered with their depth averaged; everything else
    /// keeps only the attributes the style needs. The selection tags are
    /// always kept since the style filters on them.
    pub fn tippecanoe_args(&self) -> Vec<String> {
        let args: &[&str] = match self.geometry {
            LayerGeometry::Point => &[
                "-r1",
                "--cluster-distance=10",
                "--accumulate-attribute=DEPTH:mean",
                "-yDEPTH",
            ],
            LayerGeometry::Line | LayerGeometry::Polygon => &[
                "--coalesce-densest-as-needed",
                "--extend-zooms-if-still-dropping",
                "-yVALDCO",
                "-yOBJNAM",
            ],
        };
        args.iter()
            .map(|a| a.to_string())
            .chain(SELECTION_PROPERTIES.iter().map(|tag| format!("-y{}", tag)))
            .collect()
    }
}

/// Land areas, depth contours and soundings.
pub fn default_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new("LNDARE", LayerGeometry::Polygon),
        LayerSpec::new("DEPCNT", LayerGeometry::Line),
        LayerSpec::new("SOUNDG", LayerGeometry::Point),
    ]
}
