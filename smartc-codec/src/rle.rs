//! Byte-oriented run-length coding.
//!
//! A token is `[MARKER, count, value]` with `count` in `1..=255`. Runs of
//! three or more, runs of zero, and any occurrence of the marker value are
//! tokenized; everything else is copied literally.

use crate::error::{CodecError, Result};

pub const MARKER: u8 = 0xFF;
const MAX_RUN: usize = u8::MAX as usize;

/// Append the run-length coded form of `input` to `out`
pub fn compress(input: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < input.len() {
        let value = input[i];
        let run = input[i..]
            .iter()
            .take(MAX_RUN)
            .take_while(|&&b| b == value)
            .count();

        if run >= 3 || value == 0 || value == MARKER {
            // run <= MAX_RUN
            out.extend_from_slice(&[MARKER, run as u8, value]);
        } else {
            out.extend(std::iter::repeat_n(value, run));
        }
        i += run;
    }
}

/// Decode exactly `expected` bytes starting at `*pos`, appending them to `out`.
///
/// `*pos` is advanced past the consumed input. A token that would overrun
/// `expected` is rejected so block boundaries stay aligned.
pub fn decompress(input: &[u8], pos: &mut usize, expected: usize, out: &mut Vec<u8>) -> Result<()> {
    let mut produced = 0;
    while produced < expected {
        let byte = *input.get(*pos).ok_or(CodecError::Truncated(*pos))?;
        if byte == MARKER {
            let (count, value) = match (input.get(*pos + 1), input.get(*pos + 2)) {
                (Some(&count), Some(&value)) => (usize::from(count), value),
                _ => return Err(CodecError::Truncated(input.len())),
            };
            if count == 0 || produced + count > expected {
                return Err(CodecError::InvalidRunLength(*pos));
            }
            out.extend(std::iter::repeat_n(value, count));
            produced += count;
            *pos += 3;
        } else {
            out.push(byte);
            produced += 1;
            *pos += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        compress(input, &mut encoded);
        let mut decoded = Vec::new();
        let mut pos = 0;
        decompress(&encoded, &mut pos, input.len(), &mut decoded).unwrap();
        assert_eq!(pos, encoded.len());
        decoded
    }

    #[test]
    fn test_literals_stay_literal() {
        let mut out = Vec::new();
        compress(&[1, 2, 2, 3], &mut out);
        assert_eq!(out, vec![1, 2, 2, 3]);
    }

    #[test]
    fn test_long_run_becomes_token() {
        let mut out = Vec::new();
        compress(&[7, 7, 7, 7], &mut out);
        assert_eq!(out, vec![MARKER, 4, 7]);
    }

    #[test]
    fn test_zero_always_tokenized() {
        let mut out = Vec::new();
        compress(&[0, 5], &mut out);
        assert_eq!(out, vec![MARKER, 1, 0, 5]);
    }

    #[test]
    fn test_marker_value_escaped() {
        let mut out = Vec::new();
        compress(&[MARKER, 1], &mut out);
        assert_eq!(out, vec![MARKER, 1, MARKER, 1]);
        assert_eq!(round_trip(&[MARKER, 1, MARKER, MARKER]), vec![MARKER, 1, MARKER, MARKER]);
    }

    #[test]
    fn test_run_capped_at_255() {
        let input = vec![9u8; 600];
        let mut out = Vec::new();
        compress(&input, &mut out);
        assert_eq!(out, vec![MARKER, 255, 9, MARKER, 255, 9, MARKER, 90, 9]);
        assert_eq!(round_trip(&input), input);
    }

    #[test]
    fn test_truncated_token() {
        let mut out = Vec::new();
        let mut pos = 0;
        let err = decompress(&[MARKER, 4], &mut pos, 4, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn test_token_overrunning_block() {
        let mut out = Vec::new();
        let mut pos = 0;
        let err = decompress(&[MARKER, 10, 1], &mut pos, 4, &mut out).unwrap_err();
        assert_eq!(err, CodecError::InvalidRunLength(0));
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut out = Vec::new();
        let mut pos = 0;
        let err = decompress(&[MARKER, 0, 1], &mut pos, 1, &mut out).unwrap_err();
        assert_eq!(err, CodecError::InvalidRunLength(0));
    }

    #[test]
    fn test_stops_at_expected_length() {
        let mut out = Vec::new();
        let mut pos = 0;
        decompress(&[1, 2, 3, 4], &mut pos, 2, &mut out).unwrap();
        assert_eq!(out, vec![1, 2]);
        assert_eq!(pos, 2);
    }
}
