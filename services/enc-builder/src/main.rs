//! ENC basemap builder.
//!
//! Selects chart cells per zoom level for a bounding box, converts and clips
//! their geometry, and writes an MBTiles archive with a MapLibre style and a
//! tileserver-gl config next to it.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use enc_common::{BoundingBox, EncError};
use enc_pipeline::{
    CatalogSource, ChartConverter, EncDownloader, EncRootCatalog, HttpCatalog, JsonFileCatalog,
    Ogr2OgrConverter, Pipeline, PipelineConfig, PreconvertedConverter, RunStatus, Stages,
    StyleDocument, TippecanoeEmitter,
};

use config::BuilderConfig;

const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "enc-builder")]
#[command(about = "Build a vector tile basemap and style from NOAA ENC charts")]
struct Args {
    /// Bounding box (default: whole world)
    #[arg(
        long = "bb",
        num_args = 4,
        value_names = ["MIN_LON", "MAX_LON", "MIN_LAT", "MAX_LAT"],
        allow_negative_numbers = true
    )]
    bb: Option<Vec<f64>>,

    /// Working directory for cells, scratch files and output
    #[arg(short = 'd', long, env = "ENC_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Concurrent cell conversions (default: number of CPUs)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Chart catalog: JSON file path or http(s) URL (default: scan the ENC root)
    #[arg(long, env = "ENC_CATALOG")]
    catalog: Option<String>,

    /// Configuration file path
    #[arg(long, env = "ENC_BUILDER_CONFIG")]
    config: Option<PathBuf>,

    /// Download the NOAA ENC bundle into the ENC root first
    #[arg(short = 'g', long)]
    get: bool,

    /// Write per-zoom GeoJSON
    #[arg(long)]
    geojson: bool,

    /// Build the tile archive
    #[arg(long)]
    tile: bool,

    /// Write the style and tileserver config
    #[arg(long)]
    style: bool,

    /// Print the band selection as JSON and exit
    #[arg(long)]
    plan: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn bbox(&self) -> BoundingBox {
        match self.bb.as_deref() {
            Some([min_lon, max_lon, min_lat, max_lat]) => {
                BoundingBox::from_lon_lat_extent(*min_lon, *max_lon, *min_lat, *max_lat)
            }
            _ => BoundingBox::world(),
        }
    }

    /// Without stage flags a run tiles and styles.
    fn stages(&self) -> Stages {
        if !(self.geojson || self.tile || self.style) {
            return Stages {
                geojson: false,
                tile: true,
                style: true,
            };
        }
        Stages {
            geojson: self.geojson,
            tile: self.tile,
            style: self.style,
        }
    }

    /// `--get` on its own only refreshes the ENC root.
    fn download_only(&self) -> bool {
        self.get && !(self.geojson || self.tile || self.style || self.plan)
    }

    fn level(&self) -> Level {
        if self.verbose {
            return Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so --plan output stays parseable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.level())
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Basemap build failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let config = match &args.config {
        Some(path) => BuilderConfig::load(path)?,
        None => BuilderConfig::default(),
    };
    let bbox = args.bbox();
    info!(bbox = %bbox, work_dir = %args.work_dir.display(), "Starting ENC basemap builder");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    if args.get {
        let enc_root = enc_root(&args, &config);
        let downloader = EncDownloader::new(
            &config.fetch.url,
            Duration::from_secs(config.fetch.connect_timeout_secs),
        )?;
        info!(url = downloader.url(), enc_root = %enc_root.display(), "Fetching ENC bundle");
        match downloader.fetch(&enc_root, &cancel).await {
            Ok(_) => {}
            Err(EncError::Cancelled) => {
                warn!("Download cancelled");
                return Ok(1);
            }
            Err(e) => return Err(e).context("ENC download failed"),
        }
        if args.download_only() {
            return Ok(0);
        }
    }

    let pipeline = build_pipeline(&args, &config)?;

    if args.plan {
        let (selection, cells) = pipeline.plan(&bbox).await?;
        info!(cells = cells, zooms = selection.zoom_levels().count(), "Plan ready");
        println!("{}", serde_json::to_string_pretty(&selection.summary())?);
        return Ok(if selection.has_gaps() {
            RunStatus::CompleteWithGaps.exit_code()
        } else {
            RunStatus::Complete.exit_code()
        });
    }

    let report = match pipeline.run(&bbox, args.stages(), &cancel).await {
        Ok(report) => report,
        Err(EncError::Cancelled) => {
            warn!("Run cancelled");
            return Ok(1);
        }
        Err(e) => {
            error!(code = e.code(), "Pipeline run failed");
            return Err(e).context("Pipeline run failed");
        }
    };

    let report_path = pipeline.config().output_dir.join("report.json");
    tokio::fs::create_dir_all(&pipeline.config().output_dir).await?;
    tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .await
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    for gap in &report.gaps {
        warn!(zoom = gap.zoom, reason = ?gap.reason, area = gap.area, "Coverage gap");
    }
    info!(
        run_id = %report.run_id,
        status = ?report.status,
        report = %report_path.display(),
        "Basemap build complete"
    );
    Ok(report.exit_code())
}

fn build_pipeline(args: &Args, config: &BuilderConfig) -> Result<Pipeline> {
    let work_dir = &args.work_dir;
    let output_dir = work_dir.join("mbtiles");
    let layers = config.layers();

    let converter: Arc<dyn ChartConverter> = match &config.converter.preconverted_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using pre-converted GeoJSON");
            Arc::new(PreconvertedConverter::new(dir, layers.clone()))
        }
        None => Arc::new(
            Ogr2OgrConverter::new(&config.converter.program, enc_root(args, config), layers.clone())
                .with_s57_options(&config.converter.s57_options),
        ),
    };

    let tiler = TippecanoeEmitter::new(
        work_dir,
        output_dir.join(&config.tiling.archive_name),
        layers,
    )
    .with_programs(&config.tiling.tippecanoe, &config.tiling.tile_join)
    .with_name(&config.style.name);

    let style_template = config
        .style_template
        .as_deref()
        .map(load_style_template)
        .transpose()?;

    let mut pipeline_config = PipelineConfig {
        zoom_bands: config.zoom_bands.clone(),
        style: config.style.clone(),
        style_template,
        output_dir,
        archive_name: config.tiling.archive_name.clone(),
        ..PipelineConfig::default()
    };
    if let Some(jobs) = args.jobs.or(config.concurrency) {
        anyhow::ensure!(jobs > 0, "--jobs must be at least 1");
        pipeline_config.concurrency = jobs;
    }

    let catalog = open_catalog(args, config, pipeline_config.concurrency)?;

    Ok(Pipeline::new(catalog, converter, Arc::new(tiler), pipeline_config))
}

fn enc_root(args: &Args, config: &BuilderConfig) -> PathBuf {
    config
        .converter
        .enc_root
        .clone()
        .unwrap_or_else(|| args.work_dir.join("ENC_ROOT"))
}

fn open_catalog(
    args: &Args,
    config: &BuilderConfig,
    concurrency: usize,
) -> Result<Arc<dyn CatalogSource>> {
    let Some(location) = args.catalog.clone().or_else(|| config.catalog.clone()) else {
        let root = enc_root(args, config);
        if !root.is_dir() && !args.get {
            warn!(enc_root = %root.display(), "ENC root does not exist, use --get to download it");
        }
        info!(enc_root = %root.display(), "Scanning ENC root for chart cells");
        return Ok(Arc::new(
            EncRootCatalog::new(root)
                .with_program(&config.converter.ogrinfo)
                .with_extent_layer(&config.converter.extent_layer)
                .with_concurrency(concurrency),
        ));
    };

    if location.starts_with("http://") || location.starts_with("https://") {
        let timeout = Duration::from_secs(
            config
                .catalog_timeout_secs
                .unwrap_or(DEFAULT_CATALOG_TIMEOUT_SECS),
        );
        info!(url = %location, "Using HTTP chart catalog");
        Ok(Arc::new(HttpCatalog::new(location, timeout)?))
    } else {
        info!(path = %location, "Using chart catalog file");
        Ok(Arc::new(JsonFileCatalog::new(location)))
    }
}

fn load_style_template(path: &Path) -> Result<StyleDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read style template: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid style template: {}", path.display()))
}
