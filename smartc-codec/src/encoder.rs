use bytes::Bytes;
use smartc_core::config::CodecConfig;
use tracing::{debug, warn};

use crate::block::{BlockGrid, BYTES_PER_PIXEL};
use crate::error::{CodecError, Result};
use crate::frame::{EncodedFrame, DELTA_MARKER, KEYFRAME_MARKER};
use crate::quality::{QualityLevel, QualityParams};
use crate::rle;

pub const DEFAULT_KEYFRAME_INTERVAL: u32 = 30;

/// Offset applied to signed deltas so they fit in a byte
const DELTA_BIAS: i16 = 128;

/// Blocks-changed ratio above which a delta frame is abandoned, as a fraction of 10
const FALLBACK_TENTHS: usize = 7;

/// Round a channel value down to a multiple of `step`
#[inline]
pub(crate) const fn quantize(value: u8, step: u8) -> u8 {
    value / step * step
}

/// Apply one biased delta byte to a reference channel value
#[inline]
pub(crate) fn apply_delta(reference: u8, delta: u8) -> u8 {
    let value = i16::from(reference) + i16::from(delta) - DELTA_BIAS;
    value.clamp(0, 255) as u8
}

/// Biased, quantized delta from `reference` to `target`, or `None` when the
/// difference does not fit in a byte
#[inline]
fn encode_delta(reference: u8, target: u8, step: u8) -> Option<u8> {
    let diff = i16::from(target) - i16::from(reference);
    if !(-DELTA_BIAS..DELTA_BIAS).contains(&diff) {
        return None;
    }
    let step = i16::from(step);
    Some((diff / step * step + DELTA_BIAS) as u8)
}

pub(crate) fn frame_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(CodecError::InvalidDimensions { width, height });
    }
    let width = usize::try_from(width).map_err(|_| CodecError::Overflow)?;
    let height = usize::try_from(height).map_err(|_| CodecError::Overflow)?;
    width
        .checked_mul(height)
        .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
        .ok_or(CodecError::Overflow)
}

/// Stateful keyframe/delta encoder for a single RGBA stream.
///
/// Two reference buffers are kept. `previous` holds the last raw input and
/// drives change detection. `reconstructed` mirrors what a decoder holds
/// after the last frame, and deltas are computed against it so quantization
/// error does not accumulate across delta frames.
#[derive(Debug)]
pub struct DifferentialEncoder {
    width: u32,
    height: u32,
    frame_len: usize,
    quality: QualityLevel,
    keyframe_interval: u32,
    frame_count: u64,
    force_keyframe: bool,
    previous: Option<Vec<u8>>,
    reconstructed: Vec<u8>,
    block: Vec<u8>,
    delta: Vec<u8>,
}

impl DifferentialEncoder {
    pub fn new(width: u32, height: u32, quality: QualityLevel) -> Result<Self> {
        let mut encoder = Self {
            width,
            height,
            frame_len: 0,
            quality,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            frame_count: 0,
            force_keyframe: false,
            previous: None,
            reconstructed: Vec::new(),
            block: Vec::new(),
            delta: Vec::new(),
        };
        encoder.initialize(width, height, quality)?;
        Ok(encoder)
    }

    /// Build an encoder from the `codec` config section
    pub fn from_config(width: u32, height: u32, config: &CodecConfig) -> Result<Self> {
        let quality = config.default_quality.parse().unwrap_or_else(|err| {
            warn!(error = %err, "Falling back to default codec quality");
            QualityLevel::default()
        });
        Ok(Self::new(width, height, quality)?.with_keyframe_interval(config.keyframe_interval))
    }

    /// Intervals of 0 or 1 make every frame a keyframe
    #[must_use]
    pub const fn with_keyframe_interval(mut self, interval: u32) -> Self {
        self.keyframe_interval = interval;
        self
    }

    /// (Re)allocate the reference buffers and restart the frame sequence
    pub fn initialize(&mut self, width: u32, height: u32, quality: QualityLevel) -> Result<()> {
        let frame_len = frame_len(width, height)?;
        self.width = width;
        self.height = height;
        self.frame_len = frame_len;
        self.quality = quality;
        self.reconstructed = vec![0; frame_len];
        self.reset();
        Ok(())
    }

    /// Drop the reference frame so the next frame is a keyframe with sequence 1
    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.previous = None;
        self.force_keyframe = false;
    }

    /// Make the next frame a keyframe without restarting the sequence
    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Pick the quality for measured bandwidth. A change takes effect on the
    /// next frame, which is forced to be a keyframe.
    pub fn adjust_quality(&mut self, available_kbps: u32) -> QualityLevel {
        let next = QualityLevel::from_bandwidth(available_kbps);
        if next != self.quality {
            debug!(from = %self.quality, to = %next, available_kbps, "Encoder quality changed");
            self.quality = next;
            self.force_keyframe = true;
        }
        next
    }

    #[must_use]
    pub const fn quality(&self) -> QualityLevel {
        self.quality
    }

    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn encode_frame(&mut self, raw: &[u8]) -> Result<EncodedFrame> {
        if raw.len() != self.frame_len {
            return Err(CodecError::DimensionMismatch {
                expected: self.frame_len,
                actual: raw.len(),
            });
        }

        self.frame_count += 1;
        let params = self.quality.params();
        let grid = BlockGrid::new(
            self.width as usize,
            self.height as usize,
            params.block_size,
        );
        let scheduled = self.keyframe_interval <= 1
            || self.frame_count % u64::from(self.keyframe_interval) == 1;

        let previous = self.previous.take();
        let delta = match &previous {
            Some(prev) if !scheduled && !self.force_keyframe && grid.addressable() => {
                self.encode_delta_frame(raw, prev, &grid, params)
            }
            _ => None,
        };

        let (payload, is_keyframe) = match delta {
            Some(payload) => (payload, false),
            None => (self.encode_keyframe(raw, &grid, params), true),
        };

        if is_keyframe {
            self.force_keyframe = false;
        }
        self.previous = Some(match previous {
            Some(mut buf) => {
                buf.copy_from_slice(raw);
                buf
            }
            None => raw.to_vec(),
        });

        Ok(EncodedFrame {
            payload: Bytes::from(payload),
            width: self.width,
            height: self.height,
            is_keyframe,
            sequence: self.frame_count,
            quality: self.quality,
        })
    }

    fn encode_keyframe(&mut self, raw: &[u8], grid: &BlockGrid, params: QualityParams) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_len / 2 + 2);
        out.extend_from_slice(&[KEYFRAME_MARKER, self.quality.tag()]);

        for (bx, by) in grid.positions() {
            let rect = grid.rect(bx, by);
            grid.gather(raw, &rect, &mut self.block);
            for value in &mut self.block {
                *value = quantize(*value, params.quantization);
            }
            rle::compress(&self.block, &mut out);
            grid.scatter(&mut self.reconstructed, &rect, &self.block);
        }
        out
    }

    /// `None` means the frame must be sent as a keyframe instead
    fn encode_delta_frame(
        &mut self,
        raw: &[u8],
        previous: &[u8],
        grid: &BlockGrid,
        params: QualityParams,
    ) -> Option<Vec<u8>> {
        let changed: Vec<(usize, usize)> = grid
            .positions()
            .filter(|&(bx, by)| {
                grid.changed(raw, previous, &grid.rect(bx, by), params.diff_threshold)
            })
            .collect();

        if changed.len() * 10 > grid.len() * FALLBACK_TENTHS {
            debug!(
                changed = changed.len(),
                total = grid.len(),
                "Too many blocks changed, encoding keyframe"
            );
            return None;
        }

        let count = u16::try_from(changed.len()).ok()?;
        let mut out = Vec::with_capacity(3 + changed.len() * 16);
        out.push(DELTA_MARKER);
        out.extend_from_slice(&count.to_le_bytes());

        self.delta.clear();
        for &(bx, by) in &changed {
            let rect = grid.rect(bx, by);
            grid.gather(raw, &rect, &mut self.block);
            let start = self.delta.len();
            let stride = rect.width * BYTES_PER_PIXEL;
            for row in 0..rect.height {
                let reference = &self.reconstructed[grid.row_span(&rect, row)];
                let target = &self.block[row * stride..(row + 1) * stride];
                for (&r, &t) in reference.iter().zip(target) {
                    let Some(byte) = encode_delta(r, t, params.quantization) else {
                        debug!(
                            block_x = bx,
                            block_y = by,
                            "Delta out of range, encoding keyframe"
                        );
                        return None;
                    };
                    self.delta.push(byte);
                }
            }
            // grid coordinates fit in a byte when the grid is addressable
            out.extend_from_slice(&[bx as u8, by as u8]);
            rle::compress(&self.delta[start..], &mut out);
        }

        let mut offset = 0;
        for &(bx, by) in &changed {
            let rect = grid.rect(bx, by);
            for row in 0..rect.height {
                let span = grid.row_span(&rect, row);
                let len = span.len();
                let deltas = &self.delta[offset..offset + len];
                for (value, &delta) in self.reconstructed[span].iter_mut().zip(deltas) {
                    *value = apply_delta(*value, delta);
                }
                offset += len;
            }
        }

        Some(out)
    }
}
