//! ENC basemap pipeline.
//!
//! Decides which chart cell supplies geometry at every zoom level of a
//! requested box, fills zooms whose native usage band has no coverage from
//! more general bands first and more detailed bands after, and turns the
//! result into a vector tile archive plus a matching MapLibre style.
//!
//! # Architecture
//!
//! - [`catalog`]: normalized, queryable chart cell snapshot
//! - [`enc_root`]: NOAA bundle download and the `ENC_ROOT` catalog scan
//! - [`coverage`]: per-band coverage of the box and per-cell partitions
//! - [`zoom_bands`]: band → native zoom range policy
//! - [`selector`]: per-zoom assignments, fallback and gaps
//! - [`assembler`]: conversion through [`ChartConverter`] and clipping
//! - [`tiling`]: tile archive emission through [`TileEmitter`]
//! - [`style`]: style and tileserver config derived from the selection
//! - [`pipeline`]: run orchestration and the run report

pub mod assembler;
pub mod catalog;
pub mod converter;
pub mod coverage;
pub mod enc_root;
pub mod layers;
pub mod pipeline;
pub mod region;
pub mod selector;
pub mod style;
pub mod tiling;
pub mod zoom_bands;

// Re-exports
pub use assembler::{Assembly, CellFailure, GeometryAssembler};
pub use catalog::{CatalogSource, ChartCatalog, HttpCatalog, JsonFileCatalog, StaticCatalog};
pub use converter::{ChartConverter, ConversionError, Ogr2OgrConverter, PreconvertedConverter};
pub use coverage::{resolve_coverage, BandCoverage, CellRegion, CoverageMap};
pub use enc_root::{EncDownloader, EncRootCatalog, NOAA_ENC_URL};
pub use layers::{default_layers, LayerGeometry, LayerSpec};
pub use pipeline::{Pipeline, PipelineConfig, RunReport, RunStatus, Stages};
pub use selector::{
    AssignedRegion, BandSelector, CoverageGap, GapReason, Provenance, Selection, SelectionSummary,
    ZoomAssignment,
};
pub use style::{derive_style, StyleDocument, StyleOptions};
pub use tiling::{TileArchive, TileEmitter, TippecanoeEmitter};
pub use zoom_bands::{ZoomBandMap, ZoomBandMapError};
