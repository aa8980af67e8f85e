//! Differential video codec.
//!
//! Frames are RGBA buffers split into square blocks. Keyframes carry every
//! block quantized and run-length coded; delta frames carry only blocks whose
//! mean RGB difference from the previous frame exceeds the quality threshold.
//!
//! Wire layout:
//!
//! ```text
//! keyframe: 0xFF | quality tag | rle(block 0) | rle(block 1) | ...
//! delta:    0x00 | count (u16 le) | { x | y | rle(delta + 128) } * count
//! ```

pub mod block;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod quality;
pub mod rle;

pub use decoder::DifferentialDecoder;
pub use encoder::{DifferentialEncoder, DEFAULT_KEYFRAME_INTERVAL};
pub use error::{CodecError, Result};
pub use frame::{DecodedFrame, EncodedFrame, FrameHeader};
pub use quality::{QualityLevel, QualityParams};
