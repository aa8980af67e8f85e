//! Codec error types

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame is {actual} bytes, expected {expected} for the configured dimensions")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Encoded frame truncated at byte {0}")]
    Truncated(usize),

    #[error("Invalid run length at byte {0}")]
    InvalidRunLength(usize),

    #[error("Unknown quality tag {0}")]
    UnknownQuality(u8),

    #[error("Unknown frame type byte {0:#04x}")]
    UnknownFrameType(u8),

    #[error("Block ({x}, {y}) outside the {cols}x{rows} grid")]
    BlockOutOfRange { x: u8, y: u8, cols: usize, rows: usize },

    #[error("{0} trailing bytes after the last block")]
    TrailingBytes(usize),

    /// No usable reference frame. The stream resumes at the next keyframe.
    #[error("Delta frame received without a valid reference frame")]
    NeedsKeyframe,

    #[error("Frame dimensions overflow the addressable buffer size")]
    Overflow,
}

impl CodecError {
    /// Whether the consumer must ask the producer for a fresh keyframe.
    ///
    /// True for every error that leaves the decoder without a reference.
    #[must_use]
    pub const fn needs_keyframe(&self) -> bool {
        !matches!(
            self,
            Self::DimensionMismatch { .. } | Self::InvalidDimensions { .. } | Self::Overflow
        )
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
