//! Error types for the ENC basemap builder.

use thiserror::Error;

use crate::zoom::ZoomLevel;

/// Result type alias using EncError.
pub type EncResult<T> = Result<T, EncError>;

/// Primary error type for a basemap build run.
#[derive(Debug, Error)]
pub enum EncError {
    // === Input Errors ===
    #[error("Invalid bounding box: {0}")]
    InvalidBbox(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Collaborator Errors ===
    #[error("Chart catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Chart download failed: {0}")]
    DownloadFailed(String),

    #[error("Conversion failed for cell {cell_id}: {message}")]
    ConversionFailed { cell_id: String, message: String },

    #[error("Tiling failed{}: {message}", zoom_suffix(.zoom))]
    TilingFailed {
        zoom: Option<ZoomLevel>,
        message: String,
    },

    // === Run Control ===
    #[error("Run cancelled before completion")]
    Cancelled,

    // === Infrastructure Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EncError {
    /// Short machine-readable code used in run reports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EncError::InvalidBbox(_) => "InvalidBbox",
            EncError::InvalidConfig(_) => "InvalidConfig",
            EncError::CatalogUnavailable(_) => "CatalogUnavailable",
            EncError::DownloadFailed(_) => "DownloadFailed",
            EncError::ConversionFailed { .. } => "ConversionFailed",
            EncError::TilingFailed { .. } => "TilingFailed",
            EncError::Cancelled => "Cancelled",
            EncError::Io(_) => "Io",
            EncError::Json(_) => "Json",
        }
    }
}

fn zoom_suffix(zoom: &Option<ZoomLevel>) -> String {
    zoom.map(|z| format!(" at zoom {z}")).unwrap_or_default()
}

impl From<crate::bbox::BboxParseError> for EncError {
    fn from(err: crate::bbox::BboxParseError) -> Self {
        EncError::InvalidBbox(err.to_string())
    }
}
