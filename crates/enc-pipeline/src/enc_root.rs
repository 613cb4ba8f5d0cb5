//! The local `ENC_ROOT` tree: NOAA's bundle download and a catalog built by
//! scanning it.
//!
//! NOAA publishes every cell in a single zip whose entries live under
//! `ENC_ROOT/<id>/<id>.000` (plus `.001`.. update files). [`EncDownloader`]
//! streams that zip to disk and unpacks it; [`EncRootCatalog`] walks the
//! unpacked tree and asks `ogrinfo` for each cell's coverage extent and
//! `DSID` edition/update numbers.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use metrics::counter;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use enc_common::{BoundingBox, ChartCellDescriptor, EncError, EncResult};

use crate::catalog::CatalogSource;

/// NOAA's all-cells bundle.
pub const NOAA_ENC_URL: &str = "https://charts.noaa.gov/ENCs/All_ENCs.zip";

/// Top-level directory inside the bundle.
pub const ENC_ROOT_DIR: &str = "ENC_ROOT";

/// Layer whose extent is taken as the cell footprint.
pub const DEFAULT_EXTENT_LAYER: &str = "M_COVR";

const DSID_LAYER: &str = "DSID";
const PARTIAL_ARCHIVE: &str = "All_ENCs.zip.part";

// ============================================================================
// Download
// ============================================================================

/// Downloads and unpacks the NOAA ENC bundle.
#[derive(Debug, Clone)]
pub struct EncDownloader {
    url: String,
    client: reqwest::Client,
}

impl EncDownloader {
    /// `connect_timeout` bounds connection setup only; the bundle is large
    /// and the transfer itself is not time-limited.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> EncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("enc-basemap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download the bundle and unpack its cells into `enc_root`.
    ///
    /// The zip is staged next to `enc_root` and removed afterwards. Returns
    /// the number of files written.
    #[instrument(skip(self, cancel), fields(url = %self.url))]
    pub async fn fetch(&self, enc_root: &Path, cancel: &CancellationToken) -> EncResult<usize> {
        if cancel.is_cancelled() {
            return Err(EncError::Cancelled);
        }

        let staging = enc_root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(staging).await?;
        let archive_path = staging.join(PARTIAL_ARCHIVE);

        let result = self.download(&archive_path, cancel).await;
        let extracted = match result {
            Ok(()) => {
                let archive = archive_path.clone();
                let root = enc_root.to_path_buf();
                tokio::task::spawn_blocking(move || extract_cells(&archive, &root))
                    .await
                    .map_err(|e| EncError::DownloadFailed(format!("extraction task: {}", e)))
                    .and_then(|r| r)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %archive_path.display(), error = %e, "Failed to remove staged archive");
            }
        }

        let files = extracted?;
        info!(files = files, enc_root = %enc_root.display(), "ENC bundle unpacked");
        Ok(files)
    }

    async fn download(&self, path: &Path, cancel: &CancellationToken) -> EncResult<()> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EncError::DownloadFailed(format!("{}: {}", self.url, e)))?;

        let total = response.content_length();
        info!(total_bytes = ?total, "Starting ENC bundle download");

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                warn!(bytes = downloaded, "Download cancelled");
                return Err(EncError::Cancelled);
            }
            let chunk =
                chunk.map_err(|e| EncError::DownloadFailed(format!("{}: {}", self.url, e)))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        counter!("enc_download_bytes_total").increment(downloaded);
        info!(bytes = downloaded, "ENC bundle downloaded");
        Ok(())
    }
}

/// Unpack `archive` into `enc_root`, dropping the bundle's leading
/// `ENC_ROOT/` component. Entries that would escape `enc_root` are skipped.
pub fn extract_cells(archive: &Path, enc_root: &Path) -> EncResult<usize> {
    let zip_error =
        |e: zip::result::ZipError| EncError::DownloadFailed(format!("{}: {}", archive.display(), e));

    let file = std::fs::File::open(archive)?;
    let mut bundle = zip::ZipArchive::new(file).map_err(zip_error)?;
    std::fs::create_dir_all(enc_root)?;

    let mut written = 0;
    for index in 0..bundle.len() {
        let mut entry = bundle.by_index(index).map_err(zip_error)?;
        let Some(name) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = entry.name(), "Skipping archive entry outside the bundle root");
            continue;
        };

        let relative = name.strip_prefix(ENC_ROOT_DIR).unwrap_or(&name);
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = enc_root.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    debug!(archive = %archive.display(), files = written, "Archive extracted");
    Ok(written)
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum ScanError {
    #[error("{program} could not be started: {source}")]
    MissingTool { program: String, source: io::Error },

    #[error("{0}")]
    Cell(String),
}

/// Catalog built from the cells unpacked under `ENC_ROOT`.
///
/// Band comes from the cell name. Cells `ogrinfo` cannot read are skipped
/// with a warning; a missing `ogrinfo` makes the catalog unavailable.
#[derive(Debug, Clone)]
pub struct EncRootCatalog {
    root: PathBuf,
    program: String,
    extent_layer: String,
    concurrency: usize,
}

impl EncRootCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            program: "ogrinfo".to_string(),
            extent_layer: DEFAULT_EXTENT_LAYER.to_string(),
            concurrency: 4,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_extent_layer(mut self, layer: impl Into<String>) -> Self {
        self.extent_layer = layer.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// `(id, <root>/<id>/<id>.000)` for every cell directory, ordered by id.
    pub async fn cell_sources(&self) -> EncResult<Vec<(String, PathBuf)>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            EncError::CatalogUnavailable(format!(
                "{}: {} (download the NOAA ENC bundle first)",
                self.root.display(),
                e
            ))
        })?;

        let mut sources = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let source = entry.path().join(format!("{}.000", id));
            if tokio::fs::try_exists(&source).await? {
                sources.push((id, source));
            } else {
                debug!(dir = %entry.path().display(), "No base cell file");
            }
        }

        sources.sort();
        Ok(sources)
    }

    async fn describe_cell(&self, id: String, source: &Path) -> Result<ChartCellDescriptor, ScanError> {
        let summary = self.ogrinfo(&["-so"], source, &self.extent_layer).await?;
        let bbox = parse_extent(&summary)
            .ok_or_else(|| ScanError::Cell(format!("no extent reported for {}", self.extent_layer)))?;

        let (edition, update_sequence) = match self.ogrinfo(&["-q"], source, DSID_LAYER).await {
            Ok(record) => parse_dsid(&record),
            Err(ScanError::Cell(message)) => {
                debug!(cell = %id, error = %message, "No DSID record");
                (None, None)
            }
            Err(e) => return Err(e),
        };

        Ok(ChartCellDescriptor {
            id,
            band: None,
            bbox: Some(bbox),
            footprint: None,
            edition,
            update_sequence,
        })
    }

    async fn ogrinfo(&self, flags: &[&str], source: &Path, layer: &str) -> Result<String, ScanError> {
        let output = Command::new(&self.program)
            .arg("-ro")
            .args(flags)
            .arg(source)
            .arg(layer)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ScanError::MissingTool {
                    program: self.program.clone(),
                    source: e,
                },
                _ => ScanError::Cell(e.to_string()),
            })?;

        if !output.status.success() {
            return Err(ScanError::Cell(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl CatalogSource for EncRootCatalog {
    async fn query(&self, _bbox: &BoundingBox) -> EncResult<Vec<ChartCellDescriptor>> {
        let sources = self.cell_sources().await?;
        info!(root = %self.root.display(), cells = sources.len(), "Scanning ENC_ROOT");

        let results: Vec<(String, Result<ChartCellDescriptor, ScanError>)> = stream::iter(sources)
            .map(|(id, source)| async move {
                let result = self.describe_cell(id.clone(), &source).await;
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut descriptors = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e @ ScanError::MissingTool { .. }) => {
                    return Err(EncError::CatalogUnavailable(e.to_string()))
                }
                Err(ScanError::Cell(message)) => {
                    warn!(cell = %id, error = %message, "Skipping unreadable chart cell")
                }
            }
        }

        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(descriptors)
    }

    fn describe(&self) -> String {
        format!("ENC_ROOT {}", self.root.display())
    }
}

/// Parse `Extent: (min_x, min_y) - (max_x, max_y)` from `ogrinfo -so`.
///
/// Returns `[min_lon, min_lat, max_lon, max_lat]`.
pub fn parse_extent(summary: &str) -> Option<[f64; 4]> {
    let extent = summary
        .lines()
        .find_map(|line| line.trim().strip_prefix("Extent:"))?;
    let (low, high) = extent.split_once(") - (")?;
    let (min_x, min_y) = parse_pair(low)?;
    let (max_x, max_y) = parse_pair(high)?;
    Some([min_x, min_y, max_x, max_y])
}

fn parse_pair(text: &str) -> Option<(f64, f64)> {
    let text = text.trim().trim_start_matches('(').trim_end_matches(')');
    let (x, y) = text.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Edition and update number from a `DSID` feature dump.
pub fn parse_dsid(record: &str) -> (Option<u32>, Option<u32>) {
    let field = |name: &str| {
        record.lines().find_map(|line| {
            let line = line.trim();
            if !line.starts_with(name) {
                return None;
            }
            line.split_once('=')?.1.trim().parse::<u32>().ok()
        })
    };
    (field("DSID_EDTN"), field("DSID_UPDN"))
}
