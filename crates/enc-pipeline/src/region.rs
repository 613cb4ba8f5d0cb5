//! Planar region algebra over lon/lat multipolygons.
//!
//! Thin wrappers around `geo`'s boolean operations that treat the empty
//! multipolygon as a first-class value and drop numerical slivers.

use geo::{Area, BooleanOps, MultiPolygon};

/// Regions smaller than this (square degrees) are treated as empty.
///
/// Roughly 1 m² at the equator; boolean ops on shared edges leave slivers
/// far below this.
pub const AREA_EPSILON: f64 = 1e-10;

pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

pub fn is_negligible(region: &MultiPolygon<f64>) -> bool {
    region.0.is_empty() || region.unsigned_area() < AREA_EPSILON
}

/// Drop member polygons that are below the sliver threshold.
pub fn clean(region: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        region
            .0
            .into_iter()
            .filter(|p| p.unsigned_area() >= AREA_EPSILON)
            .collect(),
    )
}

pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if a.0.is_empty() || b.0.is_empty() {
        return empty();
    }
    clean(a.intersection(b))
}

pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    match (a.0.is_empty(), b.0.is_empty()) {
        (true, true) => empty(),
        (true, false) => b.clone(),
        (false, true) => a.clone(),
        (false, false) => clean(a.union(b)),
    }
}

pub fn difference(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if a.0.is_empty() {
        return empty();
    }
    if b.0.is_empty() {
        return a.clone();
    }
    clean(a.difference(b))
}

/// Whether `outer` covers `inner` up to the sliver threshold.
pub fn covers(outer: &MultiPolygon<f64>, inner: &MultiPolygon<f64>) -> bool {
    is_negligible(&difference(inner, outer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enc_common::BoundingBox;

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        BoundingBox::new(min_x, min_y, max_x, max_y).to_multi_polygon()
    }

    #[test]
    fn test_difference_with_empty() {
        let a = square(0.0, 0.0, 1.0, 1.0);
        assert_eq!(difference(&a, &empty()), a);
        assert!(difference(&empty(), &a).0.is_empty());
    }

    #[test]
    fn test_union_and_cover() {
        let left = square(0.0, 0.0, 1.0, 1.0);
        let right = square(1.0, 0.0, 2.0, 1.0);
        let both = union(&left, &right);
        assert!((both.unsigned_area() - 2.0).abs() < 1e-9);
        assert!(covers(&both, &square(0.5, 0.25, 1.5, 0.75)));
        assert!(!covers(&left, &square(0.5, 0.25, 1.5, 0.75)));
    }

    #[test]
    fn test_shared_edge_intersection_is_negligible() {
        let left = square(0.0, 0.0, 1.0, 1.0);
        let right = square(1.0, 0.0, 2.0, 1.0);
        assert!(is_negligible(&intersection(&left, &right)));
    }
}
