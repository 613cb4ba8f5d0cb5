//! Static policy mapping usage bands to their native zoom ranges.
//!
//! The map is an explicit immutable value handed to the selector, so
//! alternate policies can be tested without touching global state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use enc_common::{UsageBand, ZoomLevel, ZoomRange};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoomBandMapError {
    #[error("Zoom band map is empty")]
    Empty,

    #[error("Band {0} is listed more than once")]
    DuplicateBand(UsageBand),

    #[error("Zoom ranges of {a} ({a_range}) and {b} ({b_range}) overlap")]
    Overlap {
        a: UsageBand,
        a_range: ZoomRange,
        b: UsageBand,
        b_range: ZoomRange,
    },

    #[error("Zoom level {0} is not mapped to any band")]
    Hole(ZoomLevel),

    #[error("Band {band} has an inverted zoom range {min}-{max}")]
    InvertedRange {
        band: UsageBand,
        min: ZoomLevel,
        max: ZoomLevel,
    },
}

/// Band → native zoom range policy.
///
/// Ranges are inclusive, non-overlapping and together cover every zoom from
/// `min_zoom()` to `max_zoom()` without holes. Bands may be left unmapped;
/// they still serve as fallback sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<UsageBand, ZoomRange>",
    into = "BTreeMap<UsageBand, ZoomRange>"
)]
pub struct ZoomBandMap {
    /// Sorted by `range.min`
    entries: Vec<(UsageBand, ZoomRange)>,
}

impl ZoomBandMap {
    pub fn new(entries: Vec<(UsageBand, ZoomRange)>) -> Result<Self, ZoomBandMapError> {
        if entries.is_empty() {
            return Err(ZoomBandMapError::Empty);
        }

        if let Some((band, range)) = entries.iter().find(|(_, r)| r.min > r.max) {
            return Err(ZoomBandMapError::InvertedRange {
                band: *band,
                min: range.min,
                max: range.max,
            });
        }

        let mut entries = entries;
        entries.sort_by_key(|(band, range)| (range.min, *band));

        for (i, (band, _)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(other, _)| other == band) {
                return Err(ZoomBandMapError::DuplicateBand(*band));
            }
        }

        for pair in entries.windows(2) {
            let (a, a_range) = pair[0];
            let (b, b_range) = pair[1];
            if a_range.overlaps(&b_range) {
                return Err(ZoomBandMapError::Overlap {
                    a,
                    a_range,
                    b,
                    b_range,
                });
            }
            if u16::from(b_range.min) > u16::from(a_range.max) + 1 {
                return Err(ZoomBandMapError::Hole(a_range.max + 1));
            }
        }

        Ok(Self { entries })
    }

    /// The NOAA band-to-zoom table.
    ///
    /// Overview 0-5, General 6-9, Coastal 10-11, Approach 12-13,
    /// Harbor 14-15, Berthing 16-18.
    pub fn noaa_default() -> Self {
        let table = [
            (UsageBand::Overview, 0, 5),
            (UsageBand::General, 6, 9),
            (UsageBand::Coastal, 10, 11),
            (UsageBand::Approach, 12, 13),
            (UsageBand::Harbor, 14, 15),
            (UsageBand::Berthing, 16, 18),
        ];
        Self {
            entries: table
                .into_iter()
                .map(|(band, min, max)| (band, ZoomRange { min, max }))
                .collect(),
        }
    }

    /// The band whose native range contains `zoom`.
    pub fn native_band(&self, zoom: ZoomLevel) -> Option<UsageBand> {
        self.entries
            .iter()
            .find(|(_, range)| range.contains(zoom))
            .map(|(band, _)| *band)
    }

    pub fn range_of(&self, band: UsageBand) -> Option<ZoomRange> {
        self.entries
            .iter()
            .find(|(b, _)| *b == band)
            .map(|(_, range)| *range)
    }

    pub fn min_zoom(&self) -> ZoomLevel {
        self.entries.first().map(|(_, r)| r.min).unwrap_or(0)
    }

    pub fn max_zoom(&self) -> ZoomLevel {
        self.entries.last().map(|(_, r)| r.max).unwrap_or(0)
    }

    /// Every zoom level the policy covers, ascending.
    pub fn zoom_levels(&self) -> impl Iterator<Item = ZoomLevel> {
        self.min_zoom()..=self.max_zoom()
    }

    pub fn entries(&self) -> &[(UsageBand, ZoomRange)] {
        &self.entries
    }
}

impl Default for ZoomBandMap {
    fn default() -> Self {
        Self::noaa_default()
    }
}

impl TryFrom<BTreeMap<UsageBand, ZoomRange>> for ZoomBandMap {
    type Error = ZoomBandMapError;

    fn try_from(map: BTreeMap<UsageBand, ZoomRange>) -> Result<Self, Self::Error> {
        Self::new(map.into_iter().collect())
    }
}

impl From<ZoomBandMap> for BTreeMap<UsageBand, ZoomRange> {
    fn from(map: ZoomBandMap) -> Self {
        map.entries.into_iter().collect()
    }
}
