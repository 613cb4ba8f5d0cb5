//! Zoom levels and inclusive zoom ranges.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// A web map zoom level.
pub type ZoomLevel = u8;

/// An inclusive range of zoom levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min: ZoomLevel,
    pub max: ZoomLevel,
}

impl ZoomRange {
    /// Create a range, returning `None` when `min > max`.
    pub fn new(min: ZoomLevel, max: ZoomLevel) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn single(zoom: ZoomLevel) -> Self {
        Self {
            min: zoom,
            max: zoom,
        }
    }

    pub fn contains(&self, zoom: ZoomLevel) -> bool {
        zoom >= self.min && zoom <= self.max
    }

    pub fn overlaps(&self, other: &ZoomRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    pub fn levels(&self) -> RangeInclusive<ZoomLevel> {
        self.min..=self.max
    }

    pub fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    /// Never true; a range always holds at least one level.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Collapse a sorted, deduplicated list of zooms into contiguous ranges.
    pub fn runs(zooms: &[ZoomLevel]) -> Vec<ZoomRange> {
        let mut runs: Vec<ZoomRange> = Vec::new();
        for &zoom in zooms {
            match runs.last_mut() {
                Some(run) if run.max.checked_add(1) == Some(zoom) => run.max = zoom,
                _ => runs.push(ZoomRange::single(zoom)),
            }
        }
        runs
    }
}

impl std::fmt::Display for ZoomRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}
