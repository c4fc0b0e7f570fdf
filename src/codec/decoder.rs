//! Integer PCM decoding
//!
//! Signed little-endian samples of 8, 16, 24 or 32 bits are read into `i32`
//! and normalized to `[-1.0, 1.0]` by the positive maximum of the width.

use crate::audio::format::BitDepth;

/// Fixed-width sample layout, one impl per supported bit depth.
///
/// The block mixing kernel is generic over this so each width gets its own
/// monomorphized inner loop.
pub trait SampleCodec {
    const BYTES: usize;
    const MAX: f64;

    /// Read one raw sample from the first `BYTES` bytes of `bytes`.
    fn read(bytes: &[u8]) -> i32;

    /// Write one raw sample into the first `BYTES` bytes of `out`.
    fn write(value: i32, out: &mut [u8]);
}

pub struct S8;
pub struct S16;
pub struct S24;
pub struct S32;

impl SampleCodec for S8 {
    const BYTES: usize = 1;
    const MAX: f64 = 127.0;

    #[inline]
    fn read(bytes: &[u8]) -> i32 {
        bytes[0] as i8 as i32
    }

    #[inline]
    fn write(value: i32, out: &mut [u8]) {
        out[0] = value as i8 as u8;
    }
}

impl SampleCodec for S16 {
    const BYTES: usize = 2;
    const MAX: f64 = 32_767.0;

    #[inline]
    fn read(bytes: &[u8]) -> i32 {
        i16::from_le_bytes([bytes[0], bytes[1]]) as i32
    }

    #[inline]
    fn write(value: i32, out: &mut [u8]) {
        out[..2].copy_from_slice(&(value as i16).to_le_bytes());
    }
}

impl SampleCodec for S24 {
    const BYTES: usize = 3;
    const MAX: f64 = 8_388_607.0;

    #[inline]
    fn read(bytes: &[u8]) -> i32 {
        let packed = bytes[0] as i32 | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
        // sign-extend bit 23
        (packed << 8) >> 8
    }

    #[inline]
    fn write(value: i32, out: &mut [u8]) {
        let le = value.to_le_bytes();
        out[..3].copy_from_slice(&le[..3]);
    }
}

impl SampleCodec for S32 {
    const BYTES: usize = 4;
    const MAX: f64 = 2_147_483_647.0;

    #[inline]
    fn read(bytes: &[u8]) -> i32 {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn write(value: i32, out: &mut [u8]) {
        out[..4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Raw integer value of the sample at the start of `bytes`.
#[inline]
pub fn read_sample(depth: BitDepth, bytes: &[u8]) -> i32 {
    match depth {
        BitDepth::I8 => S8::read(bytes),
        BitDepth::I16 => S16::read(bytes),
        BitDepth::I24 => S24::read(bytes),
        BitDepth::I32 => S32::read(bytes),
    }
}

/// Scale a raw value into `[-1.0, 1.0]`.
#[inline]
pub fn normalize(raw: i32, max: f64) -> f64 {
    (raw as f64 / max).clamp(-1.0, 1.0)
}

/// Read and normalize one sample.
#[inline]
pub fn decode_sample(depth: BitDepth, bytes: &[u8]) -> f64 {
    normalize(read_sample(depth, bytes), depth.max_value())
}
