//! Chart catalog: the immutable, queryable snapshot of available cells.
//!
//! Descriptors come from a [`CatalogSource`] (a JSON file, an HTTP endpoint
//! or an in-memory list). Failure to reach the source is surfaced as
//! [`EncError::CatalogUnavailable`] and never retried here; retry policy
//! belongs to whoever drives the run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geo::Intersects;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use enc_common::{BoundingBox, ChartCell, ChartCellDescriptor, EncError, EncResult};

/// Anything that can answer "which chart cells exist around this box".
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch raw descriptors for cells near `bbox`.
    ///
    /// Sources may over-return; the catalog filters precisely.
    async fn query(&self, bbox: &BoundingBox) -> EncResult<Vec<ChartCellDescriptor>>;

    /// Human-readable source name for logs.
    fn describe(&self) -> String;
}

/// Catalog documents are either a bare list or `{"cells": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<ChartCellDescriptor>),
    Wrapped { cells: Vec<ChartCellDescriptor> },
}

impl CatalogDocument {
    fn into_descriptors(self) -> Vec<ChartCellDescriptor> {
        match self {
            CatalogDocument::List(cells) | CatalogDocument::Wrapped { cells } => cells,
        }
    }
}

/// Parse a catalog JSON document.
pub fn parse_catalog_document(json: &str) -> Result<Vec<ChartCellDescriptor>, serde_json::Error> {
    serde_json::from_str::<CatalogDocument>(json).map(CatalogDocument::into_descriptors)
}

/// In-memory descriptor list.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    descriptors: Vec<ChartCellDescriptor>,
}

impl StaticCatalog {
    pub fn new(descriptors: Vec<ChartCellDescriptor>) -> Self {
        Self { descriptors }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn query(&self, _bbox: &BoundingBox) -> EncResult<Vec<ChartCellDescriptor>> {
        Ok(self.descriptors.clone())
    }

    fn describe(&self) -> String {
        format!("static catalog ({} cells)", self.descriptors.len())
    }
}

/// Descriptor document stored on disk.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for JsonFileCatalog {
    async fn query(&self, _bbox: &BoundingBox) -> EncResult<Vec<ChartCellDescriptor>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            EncError::CatalogUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        parse_catalog_document(&content).map_err(|e| {
            EncError::CatalogUnavailable(format!("{}: malformed catalog: {}", self.path.display(), e))
        })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Catalog service reached over HTTP.
///
/// The box is passed as `?bbox=minx,miny,maxx,maxy`.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    url: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("enc-basemap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn query(&self, bbox: &BoundingBox) -> EncResult<Vec<ChartCellDescriptor>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("bbox", bbox.to_string())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EncError::CatalogUnavailable(format!("{}: {}", self.url, e)))?;

        let body = response
            .text()
            .await
            .map_err(|e| EncError::CatalogUnavailable(format!("{}: {}", self.url, e)))?;

        parse_catalog_document(&body).map_err(|e| {
            EncError::CatalogUnavailable(format!("{}: malformed catalog: {}", self.url, e))
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Immutable snapshot of normalized chart cells, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct ChartCatalog {
    cells: Vec<Arc<ChartCell>>,
}

impl ChartCatalog {
    /// Query `source` and normalize its descriptors.
    #[instrument(skip(source), fields(source = %source.describe()))]
    pub async fn fetch(source: &dyn CatalogSource, bbox: &BoundingBox) -> EncResult<Self> {
        let descriptors = source.query(bbox).await?;
        let catalog = Self::from_descriptors(descriptors);
        info!(cells = catalog.len(), "Loaded chart catalog");
        Ok(catalog)
    }

    /// Build a catalog, skipping invalid descriptors and duplicate ids.
    ///
    /// On duplicates the first descriptor seen wins.
    pub fn from_descriptors(descriptors: Vec<ChartCellDescriptor>) -> Self {
        let mut by_id: BTreeMap<String, Arc<ChartCell>> = BTreeMap::new();

        for descriptor in descriptors {
            let id = descriptor.id.clone();
            match descriptor.into_cell() {
                Ok(cell) => {
                    if by_id.contains_key(&id) {
                        warn!(cell = %id, "Duplicate cell id in catalog, keeping first");
                        continue;
                    }
                    by_id.insert(id, Arc::new(cell));
                }
                Err(e) => warn!(cell = %id, error = %e, "Skipping invalid catalog entry"),
            }
        }

        Self {
            cells: by_id.into_values().collect(),
        }
    }

    pub fn from_cells(cells: impl IntoIterator<Item = ChartCell>) -> Self {
        let mut cells: Vec<Arc<ChartCell>> = cells.into_iter().map(Arc::new).collect();
        cells.sort_by(|a, b| a.id.cmp(&b.id));
        cells.dedup_by(|a, b| a.id == b.id);
        Self { cells }
    }

    /// Cells whose footprint intersects `bbox`, ordered by id.
    pub fn cells_intersecting(&self, bbox: &BoundingBox) -> Vec<Arc<ChartCell>> {
        let query = bbox.to_polygon();
        let hits: Vec<Arc<ChartCell>> = self
            .cells
            .iter()
            .filter(|cell| cell.envelope_intersects(bbox) && cell.footprint.intersects(&query))
            .cloned()
            .collect();

        debug!(bbox = %bbox, hits = hits.len(), total = self.cells.len(), "Catalog query");
        hits
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ChartCell>> {
        self.cells
            .binary_search_by(|cell| cell.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.cells[i])
    }

    pub fn cells(&self) -> &[Arc<ChartCell>] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enc_common::UsageBand;

    fn descriptor(id: &str, bbox: [f64; 4]) -> ChartCellDescriptor {
        ChartCellDescriptor {
            id: id.to_string(),
            band: None,
            bbox: Some(bbox),
            footprint: None,
            edition: None,
            update_sequence: None,
        }
    }

    #[test]
    fn test_from_descriptors_sorts_and_skips_invalid() {
        let catalog = ChartCatalog::from_descriptors(vec![
            descriptor("US5BBB01", [0.0, 0.0, 1.0, 1.0]),
            descriptor("US3AAA01", [0.0, 0.0, 2.0, 2.0]),
            descriptor("bogus", [0.0, 0.0, 1.0, 1.0]),
        ]);

        let ids: Vec<&str> = catalog.cells().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["US3AAA01", "US5BBB01"]);
        assert_eq!(catalog.get("US5BBB01").unwrap().band, UsageBand::Harbor);
        assert!(catalog.get("bogus").is_none());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let catalog = ChartCatalog::from_descriptors(vec![
            descriptor("US5BBB01", [0.0, 0.0, 1.0, 1.0]),
            descriptor("US5BBB01", [5.0, 5.0, 6.0, 6.0]),
        ]);
        assert_eq!(catalog.len(), 1);
        let bbox = catalog.get("US5BBB01").unwrap().bounding_box().unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_cells_intersecting_filters_by_footprint() {
        let catalog = ChartCatalog::from_descriptors(vec![
            descriptor("US3AAA01", [-91.0, 19.0, -88.0, 22.0]),
            descriptor("US4BBB01", [10.0, 10.0, 11.0, 11.0]),
        ]);
        let hits = catalog.cells_intersecting(&BoundingBox::new(-90.0, 20.0, -89.0, 21.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "US3AAA01");
    }

    #[test]
    fn test_parse_wrapped_document() {
        let json = r#"{"cells": [{"id": "US2EC02M", "bbox": [-80, 30, -70, 40]}]}"#;
        let descriptors = parse_catalog_document(json).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].id, "US2EC02M");
    }

    #[tokio::test]
    async fn test_missing_file_is_catalog_unavailable() {
        let source = JsonFileCatalog::new("/nonexistent/enc/catalog.json");
        let result = ChartCatalog::fetch(&source, &BoundingBox::world()).await;
        assert!(matches!(result, Err(EncError::CatalogUnavailable(_))));
    }
}
