use bytes::Bytes;

use crate::error::{CodecError, Result};
use crate::quality::QualityLevel;

/// First payload byte of a keyframe
pub const KEYFRAME_MARKER: u8 = 0xFF;
/// First payload byte of a delta frame
pub const DELTA_MARKER: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Keyframe { quality: QualityLevel },
    Delta { changed_blocks: u16 },
}

impl FrameHeader {
    /// Parse the header and return it with its length in bytes
    pub fn parse(payload: &[u8]) -> Result<(Self, usize)> {
        match payload.first() {
            Some(&KEYFRAME_MARKER) => {
                let tag = *payload.get(1).ok_or(CodecError::Truncated(1))?;
                let quality = QualityLevel::try_from(tag)?;
                Ok((Self::Keyframe { quality }, 2))
            }
            Some(&DELTA_MARKER) => match payload.get(1..3) {
                Some(&[lo, hi]) => Ok((
                    Self::Delta {
                        changed_blocks: u16::from_le_bytes([lo, hi]),
                    },
                    3,
                )),
                _ => Err(CodecError::Truncated(payload.len())),
            },
            Some(&other) => Err(CodecError::UnknownFrameType(other)),
            None => Err(CodecError::Truncated(0)),
        }
    }

    #[must_use]
    pub const fn is_keyframe(&self) -> bool {
        matches!(self, Self::Keyframe { .. })
    }
}

/// One encoded frame. Immutable once produced; `payload` is the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub payload: Bytes,
    pub width: u32,
    pub height: u32,
    pub is_keyframe: bool,
    /// 1-based position in the encoder's output sequence
    pub sequence: u64,
    pub quality: QualityLevel,
}

impl EncodedFrame {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reconstructed RGBA frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub is_keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keyframe_header() {
        let (header, len) = FrameHeader::parse(&[0xFF, 2, 0xFF, 10, 0]).unwrap();
        assert_eq!(
            header,
            FrameHeader::Keyframe {
                quality: QualityLevel::Medium
            }
        );
        assert_eq!(len, 2);
    }

    #[test]
    fn test_parse_delta_header() {
        let (header, len) = FrameHeader::parse(&[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(
            header,
            FrameHeader::Delta {
                changed_blocks: 0x0201
            }
        );
        assert_eq!(len, 3);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(FrameHeader::parse(&[]), Err(CodecError::Truncated(0)));
        assert_eq!(FrameHeader::parse(&[0x00, 1]), Err(CodecError::Truncated(2)));
        assert_eq!(FrameHeader::parse(&[0xFF, 9]), Err(CodecError::UnknownQuality(9)));
        assert_eq!(FrameHeader::parse(&[0x42]), Err(CodecError::UnknownFrameType(0x42)));
    }
}
