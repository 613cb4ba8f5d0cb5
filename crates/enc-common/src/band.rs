//! ENC usage bands.
//!
//! NOAA classifies every chart cell by its intended display scale. The bands
//! form a total order from most general to most detailed, and fallback
//! between them is plain index arithmetic over [`UsageBand::ALL`]: general
//! bands are exhausted before any detailed band is consulted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chart usage band, ordered from least to most detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageBand {
    Overview,
    General,
    Coastal,
    Approach,
    Harbor,
    Berthing,
}

impl UsageBand {
    /// All bands in order, most general first.
    pub const ALL: [UsageBand; 6] = [
        UsageBand::Overview,
        UsageBand::General,
        UsageBand::Coastal,
        UsageBand::Approach,
        UsageBand::Harbor,
        UsageBand::Berthing,
    ];

    /// Zero-based position in [`UsageBand::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// NOAA band number (1 = Overview ... 6 = Berthing).
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1..=6 => Some(Self::ALL[number as usize - 1]),
            _ => None,
        }
    }

    /// Derive the band from a NOAA cell name such as `US5MA11M`.
    ///
    /// The third character of the name is the band digit.
    pub fn from_cell_name(name: &str) -> Option<Self> {
        name.chars()
            .nth(2)
            .and_then(|c| c.to_digit(10))
            .and_then(|d| Self::from_number(d as u8))
    }

    /// Bands to consult when this band is the native band for a zoom.
    ///
    /// Starts with `self`, then every more general band nearest first, then
    /// every more detailed band nearest first.
    pub fn search_order(self) -> Vec<UsageBand> {
        let origin = self.index();
        let mut order = Vec::with_capacity(Self::ALL.len());
        order.push(self);
        order.extend(Self::ALL[..origin].iter().rev().copied());
        order.extend(Self::ALL[origin + 1..].iter().copied());
        order
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UsageBand::Overview => "overview",
            UsageBand::General => "general",
            UsageBand::Coastal => "coastal",
            UsageBand::Approach => "approach",
            UsageBand::Harbor => "harbor",
            UsageBand::Berthing => "berthing",
        }
    }
}

impl fmt::Display for UsageBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown usage band: {0}")]
pub struct UnknownBand(pub String);

impl FromStr for UsageBand {
    type Err = UnknownBand;

    /// Accepts band names (any case) or NOAA band numbers `1`..`6`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<u8>() {
            return Self::from_number(number).ok_or_else(|| UnknownBand(s.to_string()));
        }

        Self::ALL
            .iter()
            .copied()
            .find(|band| band.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownBand(s.to_string()))
    }
}
