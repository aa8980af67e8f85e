use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Encoding quality. The discriminant is the tag written into keyframe headers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum QualityLevel {
    VeryLow = 0,
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    VeryHigh = 4,
}

/// Per-level encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityParams {
    /// Channel values are rounded down to a multiple of this step
    pub quantization: u8,
    /// Square block edge in pixels
    pub block_size: usize,
    /// Mean absolute RGB difference a block must exceed to count as changed
    pub diff_threshold: u32,
}

impl QualityLevel {
    pub const ALL: [Self; 5] = [
        Self::VeryLow,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::VeryHigh,
    ];

    #[must_use]
    pub const fn params(self) -> QualityParams {
        let (quantization, block_size, diff_threshold) = match self {
            Self::VeryLow => (32, 16, 30),
            Self::Low => (16, 8, 20),
            Self::Medium => (8, 8, 15),
            Self::High => (4, 4, 10),
            Self::VeryHigh => (2, 4, 5),
        };
        QualityParams {
            quantization,
            block_size,
            diff_threshold,
        }
    }

    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Map measured bandwidth in kbps to the level the encoder should use
    #[must_use]
    pub const fn from_bandwidth(kbps: u32) -> Self {
        match kbps {
            0..100 => Self::VeryLow,
            100..300 => Self::Low,
            300..800 => Self::Medium,
            800..2000 => Self::High,
            _ => Self::VeryHigh,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl TryFrom<u8> for QualityLevel {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(tag))
            .copied()
            .ok_or(CodecError::UnknownQuality(tag))
    }
}

impl FromStr for QualityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown quality level '{s}'"))
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
