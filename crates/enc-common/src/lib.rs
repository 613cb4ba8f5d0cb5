//! Common types shared across the ENC basemap builder crates.
//!
//! Chart cells, usage bands, bounding boxes, zoom ranges and the GeoJSON
//! model exchanged with the external converter and tiling tools.

pub mod band;
pub mod bbox;
pub mod chart;
pub mod error;
pub mod geojson;
pub mod zoom;

pub use band::UsageBand;
pub use bbox::BoundingBox;
pub use chart::{ChartCell, ChartCellDescriptor, DescriptorError};
pub use error::{EncError, EncResult};
pub use geojson::{Feature, FeatureCollection, Geometry, Position, TippecanoeHints};
pub use zoom::{ZoomLevel, ZoomRange};
