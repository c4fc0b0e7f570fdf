//! Integer PCM encoding
//!
//! Normalized values are clamped to `[-1.0, 1.0]`, scaled by the positive
//! maximum of the width and truncated toward zero.

use crate::audio::format::BitDepth;
use crate::codec::decoder::{SampleCodec, S16, S24, S32, S8};

/// Clamp, scale and truncate a normalized value to the raw integer range.
#[inline]
pub fn quantize(value: f64, max: f64) -> i32 {
    (value.clamp(-1.0, 1.0) * max) as i32
}

/// Write one raw sample at the start of `out`.
#[inline]
pub fn write_sample(depth: BitDepth, value: i32, out: &mut [u8]) {
    match depth {
        BitDepth::I8 => S8::write(value, out),
        BitDepth::I16 => S16::write(value, out),
        BitDepth::I24 => S24::write(value, out),
        BitDepth::I32 => S32::write(value, out),
    }
}

/// Encode one normalized value at the start of `out`.
#[inline]
pub fn encode_sample(depth: BitDepth, value: f64, out: &mut [u8]) {
    write_sample(depth, quantize(value, depth.max_value()), out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decoder::{decode_sample, read_sample};
    use proptest::prelude::*;

    #[test]
    fn test_quantize_truncates_toward_zero() {
        assert_eq!(quantize(0.5, 127.0), 63);
        assert_eq!(quantize(-0.5, 127.0), -63);
        assert_eq!(quantize(2.0, 32767.0), 32767);
        assert_eq!(quantize(-2.0, 32767.0), -32767);
    }

    #[test]
    fn test_out_of_range_values_saturate() {
        let mut out = [0u8; 8];
        for (value, slot) in [0.0, 1.5, -1.5, 0.25].iter().zip(out.chunks_exact_mut(2)) {
            encode_sample(BitDepth::I16, *value, slot);
        }

        assert_eq!(read_sample(BitDepth::I16, &out[0..]), 0);
        assert_eq!(read_sample(BitDepth::I16, &out[2..]), 32767);
        assert_eq!(read_sample(BitDepth::I16, &out[4..]), -32767);
        assert_eq!(read_sample(BitDepth::I16, &out[6..]), 8191);
    }

    #[test]
    fn test_32bit_full_scale() {
        let mut out = [0u8; 4];
        encode_sample(BitDepth::I32, 1.0, &mut out);
        assert_eq!(i32::from_le_bytes(out), i32::MAX);
        encode_sample(BitDepth::I32, -1.0, &mut out);
        assert_eq!(i32::from_le_bytes(out), -i32::MAX);
    }

    proptest! {
        #[test]
        fn prop_encoded_values_stay_in_range(
            values in proptest::collection::vec(-4.0f64..4.0, 1..64),
            depth in prop_oneof![
                Just(BitDepth::I8),
                Just(BitDepth::I16),
                Just(BitDepth::I24),
                Just(BitDepth::I32),
            ],
        ) {
            let width = depth.bytes();
            let mut bytes = vec![0u8; values.len() * width];
            for (value, slot) in values.iter().zip(bytes.chunks_exact_mut(width)) {
                encode_sample(depth, *value, slot);
            }

            let max = depth.max_value() as i64;
            for chunk in bytes.chunks_exact(width) {
                let raw = read_sample(depth, chunk) as i64;
                prop_assert!(raw <= max && raw >= -max);
                // Re-decoding never leaves the unit range
                prop_assert!((-1.0..=1.0).contains(&decode_sample(depth, chunk)));
            }
        }
    }
}
