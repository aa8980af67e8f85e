//! Block grid over an RGBA frame

use crate::error::{CodecError, Result};

pub const BYTES_PER_PIXEL: usize = 4;

/// Pixel rectangle covered by one block. Edge blocks may be narrower or shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl BlockRect {
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    width: usize,
    height: usize,
    block_size: usize,
    cols: usize,
    rows: usize,
}

impl BlockGrid {
    #[must_use]
    pub const fn new(width: usize, height: usize, block_size: usize) -> Self {
        Self {
            width,
            height,
            block_size,
            cols: width.div_ceil(block_size),
            rows: height.div_ceil(block_size),
        }
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.cols * self.rows
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every block coordinate fits in the one-byte fields of a delta frame
    #[must_use]
    pub const fn addressable(&self) -> bool {
        self.cols <= 256 && self.rows <= 256
    }

    #[must_use]
    pub fn rect(&self, bx: usize, by: usize) -> BlockRect {
        let x = bx * self.block_size;
        let y = by * self.block_size;
        BlockRect {
            x,
            y,
            width: self.block_size.min(self.width - x),
            height: self.block_size.min(self.height - y),
        }
    }

    /// Rect for coordinates read off the wire
    pub fn checked_rect(&self, bx: u8, by: u8) -> Result<BlockRect> {
        let (col, row) = (usize::from(bx), usize::from(by));
        if col >= self.cols || row >= self.rows {
            return Err(CodecError::BlockOutOfRange {
                x: bx,
                y: by,
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(self.rect(col, row))
    }

    /// Block coordinates in row-major order
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.rows).flat_map(move |by| (0..self.cols).map(move |bx| (bx, by)))
    }

    /// Byte range of one block row inside the frame buffer
    #[must_use]
    pub fn row_span(&self, rect: &BlockRect, row: usize) -> std::ops::Range<usize> {
        let start = ((rect.y + row) * self.width + rect.x) * BYTES_PER_PIXEL;
        start..start + rect.width * BYTES_PER_PIXEL
    }

    /// Copy the block's pixels into `out`, row by row
    pub fn gather(&self, frame: &[u8], rect: &BlockRect, out: &mut Vec<u8>) {
        out.clear();
        for row in 0..rect.height {
            out.extend_from_slice(&frame[self.row_span(rect, row)]);
        }
    }

    /// Write a block's pixels back into the frame. `block` must be `rect.byte_len()` long.
    pub fn scatter(&self, frame: &mut [u8], rect: &BlockRect, block: &[u8]) {
        let stride = rect.width * BYTES_PER_PIXEL;
        for (row, chunk) in block.chunks_exact(stride).enumerate() {
            frame[self.row_span(rect, row)].copy_from_slice(chunk);
        }
    }

    /// Mean absolute RGB difference of a block exceeds `threshold`.
    ///
    /// Alpha is not compared.
    #[must_use]
    pub fn changed(&self, current: &[u8], previous: &[u8], rect: &BlockRect, threshold: u32) -> bool {
        let mut sum: u64 = 0;
        for row in 0..rect.height {
            let span = self.row_span(rect, row);
            let cur = current[span.clone()].chunks_exact(BYTES_PER_PIXEL);
            let prev = previous[span].chunks_exact(BYTES_PER_PIXEL);
            for (c, p) in cur.zip(prev) {
                sum += (0..3)
                    .map(|ch| u64::from(c[ch].abs_diff(p[ch])))
                    .sum::<u64>();
            }
        }
        sum > u64::from(threshold) * (rect.pixel_count() as u64) * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_edge_blocks() {
        let grid = BlockGrid::new(10, 6, 4);
        assert_eq!((grid.cols(), grid.rows()), (3, 2));
        assert_eq!(grid.len(), 6);

        let edge = grid.rect(2, 1);
        assert_eq!((edge.x, edge.y, edge.width, edge.height), (8, 4, 2, 2));
        assert_eq!(edge.byte_len(), 16);
    }

    #[test]
    fn test_positions_row_major() {
        let grid = BlockGrid::new(8, 8, 4);
        let positions: Vec<_> = grid.positions().collect();
        assert_eq!(positions, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_gather_scatter() {
        let grid = BlockGrid::new(4, 4, 2);
        let frame: Vec<u8> = (0..64).collect();
        let rect = grid.rect(1, 1);

        let mut block = Vec::new();
        grid.gather(&frame, &rect, &mut block);
        assert_eq!(block, vec![40, 41, 42, 43, 44, 45, 46, 47, 56, 57, 58, 59, 60, 61, 62, 63]);

        let mut target = vec![0u8; 64];
        grid.scatter(&mut target, &rect, &block);
        assert_eq!(target[40..48], frame[40..48]);
        assert_eq!(target[0], 0);
    }

    #[test]
    fn test_change_ignores_alpha() {
        let grid = BlockGrid::new(2, 2, 2);
        let previous = vec![0u8; 16];
        let mut current = previous.clone();
        for px in current.chunks_exact_mut(4) {
            px[3] = 255;
        }
        assert!(!grid.changed(&current, &previous, &grid.rect(0, 0), 5));

        for px in current.chunks_exact_mut(4) {
            px[0] = 20;
        }
        // mean over RGB is 20 / 3
        assert!(grid.changed(&current, &previous, &grid.rect(0, 0), 6));
        assert!(!grid.changed(&current, &previous, &grid.rect(0, 0), 7));
    }

    #[test]
    fn test_checked_rect_bounds() {
        let grid = BlockGrid::new(8, 8, 8);
        assert!(grid.checked_rect(0, 0).is_ok());
        assert!(matches!(
            grid.checked_rect(1, 0),
            Err(CodecError::BlockOutOfRange { x: 1, .. })
        ));
    }
}
