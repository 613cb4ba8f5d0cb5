//! End-to-end pipeline runs against mock collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use enc_common::{BoundingBox, EncError, FeatureCollection, UsageBand};
use enc_pipeline::assembler::CELL_PROPERTY;
use enc_pipeline::tiling::{count_mbtiles_tiles, read_mbtiles_metadata};
use enc_pipeline::{
    default_layers, GapReason, Pipeline, PipelineConfig, RunStatus, Stages, StyleDocument,
    TippecanoeEmitter,
};
use test_utils::{assert_approx_eq, bbox, bbox_of, coastal_inside_general, rect_cell};

use common::{
    pipeline, pipeline_config, static_catalog, MockConverter, RecordingTiler, UnreachableCatalog,
};

fn side_by_side() -> Vec<enc_common::ChartCell> {
    vec![
        rect_cell("US3WEST1", UsageBand::Coastal, [0.0, 0.0, 1.0, 1.0]),
        rect_cell("US3EAST1", UsageBand::Coastal, [1.0, 0.0, 2.0, 1.0]),
    ]
}

// ============================================================================
// Successful runs
// ============================================================================

#[tokio::test]
async fn test_full_run_writes_every_artifact() {
    let dir = TempDir::new().unwrap();
    let cells = coastal_inside_general();
    let converter = Arc::new(MockConverter::for_cells(&cells));
    let tiler = Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles")));
    let pipeline = pipeline(&cells, converter.clone(), tiler.clone(), dir.path());

    let report = pipeline
        .run(
            &bbox_of(bbox::STRADDLING_REQUEST),
            Stages::all(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.cells_considered, 2);
    assert!(report.gaps.is_empty());
    assert!(report.failed_cells.is_empty());
    assert_eq!(report.selection.zooms.len(), 19);

    // Each cell is converted once however many zooms use it.
    assert_eq!(converter.calls(), 2);

    assert_eq!(report.geojson_paths.len(), 19);
    let z10 = std::fs::read_to_string(dir.path().join("geojsons/z10.geojson")).unwrap();
    let z10: FeatureCollection = serde_json::from_str(&z10).unwrap();
    assert!(!z10.is_empty());

    let archive = report.archive.unwrap();
    assert_eq!(archive.path, dir.path().join("enc.mbtiles"));
    assert_eq!(tiler.assemblies().len(), 1);
    assert!(archive.feature_count > 0);

    let style_path = report.style_path.unwrap();
    assert_eq!(style_path, dir.path().join("styles/enc.json"));
    let style: StyleDocument =
        serde_json::from_str(&std::fs::read_to_string(&style_path).unwrap()).unwrap();
    assert_eq!(style.sources["enc"]["url"], "mbtiles://enc.mbtiles");
    assert!(style.layer("land-coastal-native-z10").is_some());
    assert!(style.layer("land-general-fallback-z10").is_some());

    let config: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(report.tileserver_config_path.unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(config["data"]["enc"]["mbtiles"], "enc.mbtiles");
}

#[tokio::test]
async fn test_assembled_features_carry_cell_tags() {
    let dir = TempDir::new().unwrap();
    let cells = coastal_inside_general();
    let tiler = Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles")));
    let pipeline = pipeline(
        &cells,
        Arc::new(MockConverter::for_cells(&cells)),
        tiler.clone(),
        dir.path(),
    );

    let stages = Stages {
        tile: true,
        ..Default::default()
    };
    pipeline
        .run(&bbox_of(bbox::STRADDLING_REQUEST), stages, &CancellationToken::new())
        .await
        .unwrap();

    let assembly = tiler.assemblies().remove(0);
    let z10 = &assembly.collections[&10];
    let cell_ids: std::collections::BTreeSet<&str> = z10
        .features
        .iter()
        .filter_map(|f| f.property_str(CELL_PROPERTY))
        .collect();
    assert_eq!(cell_ids.len(), 2);

    for feature in &z10.features {
        let provenance = feature.property_str("enc_provenance").unwrap();
        match feature.property_str("enc_band").unwrap() {
            "coastal" => assert_eq!(provenance, "native"),
            "general" => {
                assert_eq!(provenance, "fallback");
                assert_eq!(feature.property_str("enc_native_band"), Some("coastal"));
            }
            other => panic!("unexpected band {}", other),
        }
    }
}

#[tokio::test]
async fn test_plan_only_run_converts_nothing() {
    let dir = TempDir::new().unwrap();
    let cells = coastal_inside_general();
    let converter = Arc::new(MockConverter::for_cells(&cells));
    let pipeline = pipeline(
        &cells,
        converter.clone(),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        dir.path(),
    );

    let report = pipeline
        .run(
            &bbox_of(bbox::STRADDLING_REQUEST),
            Stages::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(converter.calls(), 0);
    assert!(report.archive.is_none());
    assert!(report.style_path.is_none());
    assert!(report.geojson_paths.is_empty());
    assert_eq!(report.status, RunStatus::Complete);
}

#[test]
fn test_plan_reports_cells_considered() {
    let dir = TempDir::new().unwrap();
    let mut cells = coastal_inside_general();
    cells.push(rect_cell("US5FAR01", UsageBand::Harbor, [50.0, 50.0, 51.0, 51.0]));
    let pipeline = pipeline(
        &cells,
        Arc::new(MockConverter::for_cells(&cells)),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        dir.path(),
    );

    let (selection, considered) =
        tokio_test::block_on(pipeline.plan(&bbox_of(bbox::STRADDLING_REQUEST))).unwrap();
    assert_eq!(considered, 2);
    assert_eq!(selection.cells().len(), 2);
}

// ============================================================================
// Empty catalog
// ============================================================================

#[tokio::test]
async fn test_empty_catalog_yields_gaps_and_empty_archive() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("enc.mbtiles");
    // The tools are never spawned for an empty assembly.
    let tiler = TippecanoeEmitter::new(dir.path().join("work"), &output, default_layers())
        .with_programs("/nonexistent/tippecanoe", "/nonexistent/tile-join");
    let pipeline = Pipeline::new(
        static_catalog(&[]),
        Arc::new(MockConverter::for_cells(&[])),
        Arc::new(tiler),
        pipeline_config(dir.path()),
    );

    let request = bbox_of(bbox::OPEN_OCEAN);
    let report = pipeline
        .run(&request, Stages::all(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::CompleteWithGaps);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.cells_considered, 0);
    assert_eq!(report.gaps.len(), 19);
    for gap in &report.gaps {
        assert_eq!(gap.reason, GapReason::Uncharted);
        assert_approx_eq!(gap.area, request.area(), 1e-9);
    }

    let archive = report.archive.unwrap();
    assert_eq!(archive.feature_count, 0);
    assert_eq!(count_mbtiles_tiles(&output).await.unwrap(), 0);
    let metadata = read_mbtiles_metadata(&output).await.unwrap();
    assert_eq!(metadata["format"], "pbf");
    assert_eq!(metadata["minzoom"], "0");
    assert_eq!(metadata["maxzoom"], "18");

    // Only the background survives when nothing was assigned.
    let style: StyleDocument = serde_json::from_str(
        &std::fs::read_to_string(report.style_path.unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(style.layers.len(), 1);
    assert_eq!(style.layers[0]["paint"]["background-color"], "rgba(215, 211, 255, 1)");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_conversion_becomes_gap() {
    let dir = TempDir::new().unwrap();
    let cells = side_by_side();
    let converter = Arc::new(MockConverter::for_cells(&cells).failing("US3EAST1"));
    let tiler = Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles")));
    let pipeline = pipeline(&cells, converter, tiler.clone(), dir.path());

    let report = pipeline
        .run(
            &BoundingBox::new(0.0, 0.0, 2.0, 1.0),
            Stages::all(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::CompleteWithGaps);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.failed_cells.len(), 1);
    assert_eq!(report.failed_cells[0].cell_id, "US3EAST1");
    assert!(report.failed_cells[0].message.contains("corrupt cell"));

    assert_eq!(report.gaps.len(), 19);
    for gap in &report.gaps {
        assert_eq!(
            gap.reason,
            GapReason::ConversionFailed {
                cell_id: "US3EAST1".to_string()
            }
        );
        assert_approx_eq!(gap.area, 1.0, 1e-9);
    }

    let assembly = tiler.assemblies().remove(0);
    for (zoom, collection) in &assembly.collections {
        assert!(!collection.is_empty(), "zoom {} lost the healthy cell", zoom);
        for feature in &collection.features {
            assert_eq!(feature.property_str(CELL_PROPERTY), Some("US3WEST1"));
        }
    }
}

#[tokio::test]
async fn test_unreachable_catalog_fails_run() {
    let dir = TempDir::new().unwrap();
    let converter = Arc::new(MockConverter::for_cells(&[]));
    let pipeline = Pipeline::new(
        Arc::new(UnreachableCatalog),
        converter.clone(),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        pipeline_config(dir.path()),
    );

    let err = pipeline
        .run(&bbox_of(bbox::UNIT), Stages::all(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EncError::CatalogUnavailable(_)));
    assert_eq!(converter.calls(), 0);
    assert!(!dir.path().join("styles").exists());
}

#[tokio::test]
async fn test_invalid_bbox_is_rejected() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(
        &[],
        Arc::new(MockConverter::for_cells(&[])),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        dir.path(),
    );

    let err = pipeline
        .run(
            &BoundingBox::new(10.0, 0.0, 5.0, 1.0),
            Stages::all(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EncError::InvalidBbox(_)));
}

#[tokio::test]
async fn test_missing_tiling_tool_fails_run() {
    let dir = TempDir::new().unwrap();
    let cells = coastal_inside_general();
    let tiler = TippecanoeEmitter::new(
        dir.path().join("work"),
        dir.path().join("enc.mbtiles"),
        default_layers(),
    )
    .with_programs("/nonexistent/tippecanoe", "/nonexistent/tile-join");
    let pipeline = pipeline(
        &cells,
        Arc::new(MockConverter::for_cells(&cells)),
        Arc::new(tiler),
        dir.path(),
    );

    let err = pipeline
        .run(
            &bbox_of(bbox::STRADDLING_REQUEST),
            Stages::all(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EncError::TilingFailed { zoom: None, .. }));
}

// ============================================================================
// Cancellation and concurrency
// ============================================================================

#[tokio::test]
async fn test_cancellation_stops_new_conversions() {
    let dir = TempDir::new().unwrap();
    let cells: Vec<_> = (0..4)
        .map(|i| {
            let x = i as f64;
            rect_cell(&format!("US3CAN{:02}", i), UsageBand::Coastal, [x, 0.0, x + 1.0, 1.0])
        })
        .collect();
    let token = CancellationToken::new();
    let converter = Arc::new(MockConverter::for_cells(&cells).cancel_on_call(token.clone()));
    let pipeline = Pipeline::new(
        static_catalog(&cells),
        converter.clone(),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        PipelineConfig {
            concurrency: 1,
            ..pipeline_config(dir.path())
        },
    );

    let err = pipeline
        .run(&BoundingBox::new(0.0, 0.0, 4.0, 1.0), Stages::all(), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, EncError::Cancelled));
    assert_eq!(converter.calls(), 1);
    assert!(!dir.path().join("geojsons").exists());
}

#[tokio::test]
async fn test_pre_cancelled_run_converts_nothing() {
    let dir = TempDir::new().unwrap();
    let cells = coastal_inside_general();
    let converter = Arc::new(MockConverter::for_cells(&cells));
    let pipeline = pipeline(
        &cells,
        converter.clone(),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        dir.path(),
    );

    let token = CancellationToken::new();
    token.cancel();
    let err = pipeline
        .run(&bbox_of(bbox::STRADDLING_REQUEST), Stages::all(), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, EncError::Cancelled));
    assert_eq!(converter.calls(), 0);
}

#[tokio::test]
async fn test_conversion_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let cells: Vec<_> = (0..8)
        .map(|i| {
            let x = i as f64;
            rect_cell(&format!("US3CON{:02}", i), UsageBand::Coastal, [x, 0.0, x + 1.0, 1.0])
        })
        .collect();
    let converter =
        Arc::new(MockConverter::for_cells(&cells).with_delay(Duration::from_millis(20)));
    let pipeline = Pipeline::new(
        static_catalog(&cells),
        converter.clone(),
        Arc::new(RecordingTiler::new(dir.path().join("enc.mbtiles"))),
        PipelineConfig {
            concurrency: 3,
            ..pipeline_config(dir.path())
        },
    );

    let stages = Stages {
        tile: true,
        ..Default::default()
    };
    let report = pipeline
        .run(&BoundingBox::new(0.0, 0.0, 8.0, 1.0), stages, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(converter.calls(), 8);
    assert!(converter.max_in_flight() >= 1);
    assert!(converter.max_in_flight() <= 3);
}
