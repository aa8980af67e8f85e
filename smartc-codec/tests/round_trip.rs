use smartc_codec::{
    CodecError, DifferentialDecoder, DifferentialEncoder, QualityLevel,
};

/// Deterministic pseudo-random RGBA frame
fn noise(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..width * height * 4)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn assert_within(actual: &[u8], expected: &[u8], step: u8) {
    assert_eq!(actual.len(), expected.len());
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            a.abs_diff(e) < step,
            "byte {i}: decoded {a}, source {e}, step {step}"
        );
    }
}

/// Add `amount` to the RGB channels of the 8x8 block at (`bx`, `by`)
fn brighten_block(frame: &[u8], width: u32, bx: usize, by: usize, amount: u8) -> Vec<u8> {
    let mut next = frame.to_vec();
    for y in by * 8..by * 8 + 8 {
        for x in bx * 8..bx * 8 + 8 {
            let px = (y * width as usize + x) * 4;
            for ch in 0..3 {
                next[px + ch] = frame[px + ch].saturating_add(amount).max(60);
            }
        }
    }
    next
}

#[test]
fn test_keyframe_error_bounded_by_quantization() {
    for quality in QualityLevel::ALL {
        let (width, height) = (37, 21);
        let source = noise(width, height, quality.tag().into());
        let mut encoder = DifferentialEncoder::new(width, height, quality).unwrap();
        let mut decoder = DifferentialDecoder::new(width, height).unwrap();

        let encoded = encoder.encode_frame(&source).unwrap();
        assert!(encoded.is_keyframe);
        assert_eq!(encoded.as_bytes()[1], quality.tag());

        let decoded = decoder.decode_frame(&encoded).unwrap();
        assert_within(&decoded.data, &source, quality.params().quantization);
    }
}

#[test]
fn test_black_frame_is_marker_runs() {
    let mut encoder = DifferentialEncoder::new(16, 16, QualityLevel::Medium).unwrap();
    let encoded = encoder.encode_frame(&[0u8; 16 * 16 * 4]).unwrap();
    let bytes = encoded.as_bytes();

    assert_eq!(bytes[0], 0xFF);
    assert_eq!(bytes[1], QualityLevel::Medium.tag());
    // four 8x8 blocks of 256 zero bytes, each a 255-run plus a 1-run
    assert_eq!(bytes.len(), 2 + 4 * 6);
    for block in bytes[2..].chunks_exact(6) {
        assert_eq!(block, &[0xFF, 255, 0, 0xFF, 1, 0]);
    }

    let mut decoder = DifferentialDecoder::new(16, 16).unwrap();
    assert_eq!(decoder.decode(bytes).unwrap().data, vec![0u8; 16 * 16 * 4]);
}

#[test]
fn test_delta_round_trip_touches_only_changed_blocks() {
    let (width, height) = (32, 32);
    let quality = QualityLevel::Medium;
    let step = quality.params().quantization;
    let base = noise(width, height, 7);

    // brighten the top-left 8x8 block by 40 on RGB, leaving room to avoid clipping
    let mut next = base.clone();
    for y in 0..8 {
        for x in 0..8 {
            let px = (y * width as usize + x) * 4;
            for ch in 0..3 {
                next[px + ch] = base[px + ch].saturating_add(40).max(60);
            }
        }
    }

    let mut encoder = DifferentialEncoder::new(width, height, quality).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();

    let first = decoder.decode_frame(&encoder.encode_frame(&base).unwrap()).unwrap();
    let delta = encoder.encode_frame(&next).unwrap();
    assert!(!delta.is_keyframe);
    assert_eq!(delta.as_bytes()[0], 0x00);
    assert_eq!(u16::from_le_bytes([delta.as_bytes()[1], delta.as_bytes()[2]]), 1);
    assert_eq!(&delta.as_bytes()[3..5], &[0, 0]);

    let second = decoder.decode_frame(&delta).unwrap();
    assert!(!second.is_keyframe);

    for y in 0..height as usize {
        let row = y * width as usize * 4;
        let (changed, unchanged) = if y < 8 {
            (row..row + 32, row + 32..row + width as usize * 4)
        } else {
            (row..row, row..row + width as usize * 4)
        };
        assert_within(&second.data[changed.clone()], &next[changed], step);
        assert_eq!(second.data[unchanged.clone()], first.data[unchanged]);
    }
}

#[test]
fn test_mostly_changed_frame_falls_back_to_keyframe() {
    let (width, height) = (32, 32);
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::High).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();

    let first = encoder.encode_frame(&noise(width, height, 1)).unwrap();
    decoder.decode_frame(&first).unwrap();

    let replacement = noise(width, height, 2);
    let second = encoder.encode_frame(&replacement).unwrap();
    assert!(second.is_keyframe);
    assert_eq!(second.sequence, 2);
    assert_eq!(second.as_bytes()[0], 0xFF);

    let decoded = decoder.decode_frame(&second).unwrap();
    assert_within(&decoded.data, &replacement, QualityLevel::High.params().quantization);

    // the schedule is unaffected: frame 3 is a delta again
    assert!(!encoder.encode_frame(&replacement).unwrap().is_keyframe);
}

#[test]
fn test_drift_free_across_many_deltas() {
    let (width, height) = (16, 16);
    let quality = QualityLevel::Low;
    let mut encoder = DifferentialEncoder::new(width, height, quality).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();

    let mut frame = vec![100u8; (width * height * 4) as usize];
    decoder.decode_frame(&encoder.encode_frame(&frame).unwrap()).unwrap();

    // creep one block upward by 25 per frame; every step crosses the threshold
    for _ in 0..5 {
        for y in 0..8 {
            for x in 0..8 {
                let px = (y * width as usize + x) * 4;
                for ch in 0..3 {
                    frame[px + ch] = frame[px + ch].saturating_add(25);
                }
            }
        }
        let encoded = encoder.encode_frame(&frame).unwrap();
        assert!(!encoded.is_keyframe);
        let decoded = decoder.decode_frame(&encoded).unwrap();
        for y in 0..8 {
            let start = y * width as usize * 4;
            assert_within(
                &decoded.data[start..start + 32],
                &frame[start..start + 32],
                quality.params().quantization,
            );
        }
    }
}

#[test]
fn test_corrupt_delta_requires_keyframe_to_resync() {
    let (width, height) = (16, 16);
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::Medium).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();

    let base = noise(width, height, 3);
    decoder.decode_frame(&encoder.encode_frame(&base).unwrap()).unwrap();

    let mut next = base.clone();
    next[0] = next[0].wrapping_add(120);
    next[1] = next[1].wrapping_add(120);
    next[2] = next[2].wrapping_add(120);
    let delta = encoder.encode_frame(&next).unwrap();

    let truncated = &delta.as_bytes()[..delta.len() - 1];
    let err = decoder.decode(truncated).unwrap_err();
    assert!(err.needs_keyframe());

    let after = encoder.encode_frame(&next).unwrap();
    assert_eq!(decoder.decode_frame(&after).unwrap_err(), CodecError::NeedsKeyframe);

    encoder.request_keyframe();
    let keyframe = encoder.encode_frame(&next).unwrap();
    assert!(keyframe.is_keyframe);
    assert!(decoder.decode_frame(&keyframe).is_ok());
}

#[test]
fn test_wide_grid_only_sends_keyframes() {
    // 257 block columns cannot be addressed by one-byte coordinates
    let (width, height) = (257 * 16, 1);
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::VeryLow).unwrap();
    let frame = vec![0u8; (width * height * 4) as usize];

    assert!(encoder.encode_frame(&frame).unwrap().is_keyframe);
    assert!(encoder.encode_frame(&frame).unwrap().is_keyframe);
}

#[test]
fn test_quality_switch_carries_to_decoder() {
    let (width, height) = (16, 16);
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::VeryHigh).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();
    let frame = noise(width, height, 9);

    decoder.decode_frame(&encoder.encode_frame(&frame).unwrap()).unwrap();
    assert_eq!(decoder.quality(), QualityLevel::VeryHigh);

    encoder.adjust_quality(150);
    let switched = encoder.encode_frame(&frame).unwrap();
    assert!(switched.is_keyframe);
    decoder.decode_frame(&switched).unwrap();
    assert_eq!(decoder.quality(), QualityLevel::Low);
}

#[test]
fn test_skipped_delta_needs_keyframe() {
    let (width, height) = (32, 32);
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::Medium).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();

    let base = noise(width, height, 11);
    let first = brighten_block(&base, width, 0, 0, 40);
    let second = brighten_block(&first, width, 1, 0, 40);

    let keyframe = encoder.encode_frame(&base).unwrap();
    let d1 = encoder.encode_frame(&first).unwrap();
    let d2 = encoder.encode_frame(&second).unwrap();
    assert!(!d1.is_keyframe);
    assert!(!d2.is_keyframe);

    decoder.decode_frame(&keyframe).unwrap();
    assert_eq!(decoder.last_sequence(), Some(1));

    // d1 lost in transit
    assert_eq!(decoder.decode_frame(&d2).unwrap_err(), CodecError::NeedsKeyframe);
    assert!(!decoder.has_reference());
    assert_eq!(decoder.last_sequence(), None);

    encoder.request_keyframe();
    let resync = encoder.encode_frame(&second).unwrap();
    assert!(resync.is_keyframe);
    assert_eq!(resync.sequence, 4);
    decoder.decode_frame(&resync).unwrap();
    assert_eq!(decoder.last_sequence(), Some(4));

    let after = encoder.encode_frame(&second).unwrap();
    assert!(!after.is_keyframe);
    assert!(decoder.decode_frame(&after).is_ok());
}

#[test]
fn test_reordered_deltas_are_rejected() {
    let (width, height) = (32, 32);
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::Medium).unwrap();
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();

    let base = noise(width, height, 12);
    let first = brighten_block(&base, width, 0, 0, 40);
    let second = brighten_block(&first, width, 1, 1, 40);

    decoder.decode_frame(&encoder.encode_frame(&base).unwrap()).unwrap();
    let d1 = encoder.encode_frame(&first).unwrap();
    let d2 = encoder.encode_frame(&second).unwrap();

    assert_eq!(decoder.decode_frame(&d2).unwrap_err(), CodecError::NeedsKeyframe);
    // the late frame finds no reference either
    assert_eq!(decoder.decode_frame(&d1).unwrap_err(), CodecError::NeedsKeyframe);

    // a replayed delta is as out of order as a skipped one
    let mut decoder = DifferentialDecoder::new(width, height).unwrap();
    let mut encoder = DifferentialEncoder::new(width, height, QualityLevel::Medium).unwrap();
    decoder.decode_frame(&encoder.encode_frame(&base).unwrap()).unwrap();
    let d1 = encoder.encode_frame(&first).unwrap();
    decoder.decode_frame(&d1).unwrap();
    assert_eq!(decoder.decode_frame(&d1).unwrap_err(), CodecError::NeedsKeyframe);
}
