//! Synthetic converter output.
//!
//! The features mimic what `ogr2ogr` returns for the default S-57 layers:
//! land polygons (`LNDARE`), depth contours (`DEPCNT` with `VALDCO`) and
//! soundings (`SOUNDG`, depth as third ordinate and `DEPTH` attribute).

use enc_common::{Feature, FeatureCollection, Geometry};
use serde_json::json;

/// Property the converter uses to tag the source layer.
pub const LAYER_TAG: &str = "enc_layer";

/// A rectangular land area covering `extent`.
pub fn land_area(extent: [f64; 4], name: &str) -> Feature {
    let [min_x, min_y, max_x, max_y] = extent;
    Feature::new(Geometry::Polygon {
        coordinates: vec![vec![
            vec![min_x, min_y],
            vec![max_x, min_y],
            vec![max_x, max_y],
            vec![min_x, max_y],
            vec![min_x, min_y],
        ]],
    })
    .with_property("OBJNAM", name)
    .with_property(LAYER_TAG, "LNDARE")
}

/// A horizontal depth contour at latitude `y`.
pub fn depth_contour(y: f64, min_x: f64, max_x: f64, valdco: f64) -> Feature {
    Feature::new(Geometry::LineString {
        coordinates: vec![vec![min_x, y], vec![(min_x + max_x) / 2.0, y], vec![max_x, y]],
    })
    .with_property("VALDCO", valdco)
    .with_property(LAYER_TAG, "DEPCNT")
}

/// A single sounding with depth carried as the third ordinate.
pub fn sounding(x: f64, y: f64, depth: f64) -> Feature {
    Feature::new(Geometry::Point {
        coordinates: vec![x, y, depth],
    })
    .with_property("DEPTH", json!(depth))
    .with_property(LAYER_TAG, "SOUNDG")
}

/// An `n` x `n` grid of soundings strictly inside `extent`.
///
/// Depths increase with the grid index so every sounding is distinct.
pub fn sounding_grid(extent: [f64; 4], n: usize) -> Vec<Feature> {
    let [min_x, min_y, max_x, max_y] = extent;
    let step_x = (max_x - min_x) / (n as f64 + 1.0);
    let step_y = (max_y - min_y) / (n as f64 + 1.0);

    let mut features = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            let x = min_x + step_x * (col as f64 + 1.0);
            let y = min_y + step_y * (row as f64 + 1.0);
            features.push(sounding(x, y, (row * n + col) as f64 + 1.0));
        }
    }
    features
}

/// A plausible cell worth of features spanning `extent`: one land area in the
/// south-west quarter, a contour across the middle and a sounding grid.
pub fn cell_features(extent: [f64; 4], name: &str) -> FeatureCollection {
    let [min_x, min_y, max_x, max_y] = extent;
    let mid_x = (min_x + max_x) / 2.0;
    let mid_y = (min_y + max_y) / 2.0;

    let mut features = vec![
        land_area([min_x, min_y, mid_x, mid_y], name),
        depth_contour(mid_y, min_x, max_x, 10.0),
    ];
    features.extend(sounding_grid(extent, 3));
    FeatureCollection::new().with_features(features)
}
