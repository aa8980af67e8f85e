use tracing::debug;

use crate::block::{BlockGrid, BYTES_PER_PIXEL};
use crate::encoder::{apply_delta, frame_len};
use crate::error::{CodecError, Result};
use crate::frame::{DecodedFrame, EncodedFrame, FrameHeader};
use crate::quality::QualityLevel;
use crate::rle;

/// Inverse of [`DifferentialEncoder`](crate::DifferentialEncoder).
///
/// Frames must arrive in encoder order. [`decode_frame`](Self::decode_frame)
/// rejects a delta whose sequence does not follow the last decoded frame.
/// Any decode error drops the reference frame, after which only a keyframe
/// is accepted.
#[derive(Debug)]
pub struct DifferentialDecoder {
    width: u32,
    height: u32,
    frame_len: usize,
    /// Quality of the last keyframe; deltas reuse its block size
    quality: QualityLevel,
    previous: Option<Vec<u8>>,
    /// Sequence of the frame `previous` was reconstructed from
    last_sequence: Option<u64>,
    block: Vec<u8>,
}

impl DifferentialDecoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            width,
            height,
            frame_len: frame_len(width, height)?,
            quality: QualityLevel::default(),
            previous: None,
            last_sequence: None,
            block: Vec::new(),
        })
    }

    pub fn initialize(&mut self, width: u32, height: u32) -> Result<()> {
        *self = Self::new(width, height)?;
        Ok(())
    }

    #[must_use]
    pub const fn has_reference(&self) -> bool {
        self.previous.is_some()
    }

    #[must_use]
    pub const fn quality(&self) -> QualityLevel {
        self.quality
    }

    #[must_use]
    pub const fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn decode_frame(&mut self, frame: &EncodedFrame) -> Result<DecodedFrame> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CodecError::DimensionMismatch {
                expected: self.frame_len,
                actual: frame_len(frame.width, frame.height)?,
            });
        }

        if !frame.is_keyframe {
            let expected = self.last_sequence.map(|last| last + 1);
            if expected != Some(frame.sequence) {
                debug!(
                    sequence = frame.sequence,
                    expected = ?expected,
                    "Delta out of sequence, waiting for keyframe"
                );
                self.previous = None;
                self.last_sequence = None;
                return Err(CodecError::NeedsKeyframe);
            }
        }

        let decoded = self.decode(frame.as_bytes())?;
        self.last_sequence = Some(frame.sequence);
        Ok(decoded)
    }

    /// Decode a raw wire payload. The payload carries no sequence number, so
    /// ordering is the caller's responsibility.
    pub fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame> {
        let result = self.decode_payload(payload);
        if let Err(err) = &result {
            debug!(error = %err, "Decode failed, waiting for keyframe");
            self.previous = None;
            self.last_sequence = None;
        }
        result
    }

    fn decode_payload(&mut self, payload: &[u8]) -> Result<DecodedFrame> {
        let (header, mut pos) = FrameHeader::parse(payload)?;
        let width = self.width as usize;
        let height = self.height as usize;

        let frame = match header {
            FrameHeader::Keyframe { quality } => {
                let grid = BlockGrid::new(width, height, quality.params().block_size);
                let mut frame = self
                    .previous
                    .take()
                    .unwrap_or_else(|| vec![0; self.frame_len]);

                for (bx, by) in grid.positions() {
                    let rect = grid.rect(bx, by);
                    self.block.clear();
                    rle::decompress(payload, &mut pos, rect.byte_len(), &mut self.block)?;
                    grid.scatter(&mut frame, &rect, &self.block);
                }
                self.quality = quality;
                frame
            }
            FrameHeader::Delta { changed_blocks } => {
                let mut frame = self.previous.take().ok_or(CodecError::NeedsKeyframe)?;
                let grid = BlockGrid::new(width, height, self.quality.params().block_size);

                for _ in 0..changed_blocks {
                    let (bx, by) = match payload.get(pos..pos + 2) {
                        Some(&[bx, by]) => (bx, by),
                        _ => return Err(CodecError::Truncated(payload.len())),
                    };
                    pos += 2;
                    let rect = grid.checked_rect(bx, by)?;

                    self.block.clear();
                    rle::decompress(payload, &mut pos, rect.byte_len(), &mut self.block)?;

                    let stride = rect.width * BYTES_PER_PIXEL;
                    for (row, deltas) in self.block.chunks_exact(stride).enumerate() {
                        let span = grid.row_span(&rect, row);
                        for (value, &delta) in frame[span].iter_mut().zip(deltas) {
                            *value = apply_delta(*value, delta);
                        }
                    }
                }
                frame
            }
        };

        if pos != payload.len() {
            return Err(CodecError::TrailingBytes(payload.len() - pos));
        }

        let decoded = DecodedFrame {
            data: frame.clone(),
            width: self.width,
            height: self.height,
            is_keyframe: header.is_keyframe(),
        };
        self.previous = Some(frame);
        Ok(decoded)
    }
}
