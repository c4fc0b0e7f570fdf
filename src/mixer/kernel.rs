//! Mixing kernels
//!
//! A kernel folds one frame of every active source into the output frame.
//! The contract every implementation must honor exactly:
//!
//! - Sources are visited in registration order for every output sample.
//! - At the first channel of each sample frame, each source's envelope is
//!   advanced by one frame before its sample is read.
//! - Each sample is decoded, normalized, scaled by the source gain and folded
//!   into the accumulator with [`blend`], starting from `0.0`.
//! - The accumulator is clamped to `[-1, 1]`, scaled and truncated on write.
//!
//! [`PortableKernel`] handles every bit depth. [`BlockKernel`] produces
//! bit-identical output with per-width monomorphized loops, but only for
//! 8, 16 and 32 bit. [`select_kernel`] falls back to the portable kernel
//! whenever the faster one cannot serve the format.

use serde::{Deserialize, Serialize};

use crate::audio::format::{BitDepth, SampleFormat};
use crate::codec::decoder::{decode_sample, normalize, SampleCodec, S16, S32, S8};
use crate::codec::encoder::{encode_sample, quantize};
use crate::mixer::envelope::{Envelope, VolumeCurve};

/// Bounded, order-dependent two-signal blend.
///
/// Unlike a plain sum this never needs hard clipping for two in-range inputs,
/// but it is not associative: the fold order changes the result.
#[inline]
pub fn blend(acc: f64, sample: f64) -> f64 {
    (1.0 - (acc * sample).abs()) * (acc + sample)
}

/// One source's contribution to a tick
pub struct Lane<'a> {
    /// Exactly one frame of PCM
    pub pcm: &'a [u8],
    pub envelope: &'a mut Envelope,
}

/// Strategy for folding source frames into the output frame
pub trait MixKernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this kernel can mix the given sample width
    fn supports(&self, depth: BitDepth) -> bool;

    /// Mix `lanes` into `out`. Every lane's `pcm` is at least `out.len()` bytes.
    fn mix(&self, lanes: &mut [Lane<'_>], format: &SampleFormat, curve: VolumeCurve, out: &mut [u8]);
}

/// Per-sample reference kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableKernel;

impl MixKernel for PortableKernel {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn supports(&self, _depth: BitDepth) -> bool {
        true
    }

    fn mix(&self, lanes: &mut [Lane<'_>], format: &SampleFormat, curve: VolumeCurve, out: &mut [u8]) {
        let depth = format.bit_depth;
        let width = depth.bytes();
        let sample_size = format.sample_size();

        let mut offset = 0;
        while offset + width <= out.len() {
            let frame_start = offset % sample_size == 0;
            let mut acc = 0.0;

            for lane in lanes.iter_mut() {
                if frame_start {
                    lane.envelope.advance();
                }
                let sample =
                    decode_sample(depth, &lane.pcm[offset..]) * curve.gain(lane.envelope.volume());
                acc = blend(acc, sample);
            }

            encode_sample(depth, acc, &mut out[offset..]);
            offset += width;
        }
    }
}

/// Frame-at-a-time kernel: envelopes and gains are resolved once per sample
/// frame, and the inner loop is specialized per sample width.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockKernel;

impl BlockKernel {
    fn mix_typed<C: SampleCodec>(
        lanes: &mut [Lane<'_>],
        channels: usize,
        curve: VolumeCurve,
        out: &mut [u8],
    ) {
        let sample_size = C::BYTES * channels;
        let mut gains = vec![0.0f64; lanes.len()];

        for (index, frame) in out.chunks_exact_mut(sample_size).enumerate() {
            for (gain, lane) in gains.iter_mut().zip(lanes.iter_mut()) {
                lane.envelope.advance();
                *gain = curve.gain(lane.envelope.volume());
            }

            let base = index * sample_size;
            for channel in 0..channels {
                let offset = channel * C::BYTES;
                let mut acc = 0.0;
                for (lane, gain) in lanes.iter().zip(gains.iter()) {
                    let sample = normalize(C::read(&lane.pcm[base + offset..]), C::MAX) * gain;
                    acc = blend(acc, sample);
                }
                C::write(quantize(acc, C::MAX), &mut frame[offset..]);
            }
        }
    }
}

impl MixKernel for BlockKernel {
    fn name(&self) -> &'static str {
        "block"
    }

    fn supports(&self, depth: BitDepth) -> bool {
        !matches!(depth, BitDepth::I24)
    }

    fn mix(&self, lanes: &mut [Lane<'_>], format: &SampleFormat, curve: VolumeCurve, out: &mut [u8]) {
        let channels = format.channels as usize;
        match format.bit_depth {
            BitDepth::I8 => Self::mix_typed::<S8>(lanes, channels, curve, out),
            BitDepth::I16 => Self::mix_typed::<S16>(lanes, channels, curve, out),
            BitDepth::I32 => Self::mix_typed::<S32>(lanes, channels, curve, out),
            BitDepth::I24 => PortableKernel.mix(lanes, format, curve, out),
        }
    }
}

/// Kernel preference from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelChoice {
    /// Fastest kernel that supports the format
    #[default]
    Auto,
    /// Always the reference kernel
    Portable,
}

/// Pick the kernel once at mixer construction.
pub fn select_kernel(choice: KernelChoice, depth: BitDepth) -> Box<dyn MixKernel> {
    if choice == KernelChoice::Auto && BlockKernel.supports(depth) {
        tracing::debug!("[Mixer] Using block kernel for {}-bit", depth.bits());
        return Box::new(BlockKernel);
    }
    tracing::debug!("[Mixer] Using portable kernel for {}-bit", depth.bits());
    Box::new(PortableKernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decoder::read_sample;
    use crate::codec::encoder::write_sample;
    use proptest::prelude::*;

    fn run(
        kernel: &dyn MixKernel,
        format: &SampleFormat,
        frames: &[Vec<u8>],
        envelopes: &mut [Envelope],
        len: usize,
    ) -> Vec<u8> {
        let mut lanes: Vec<Lane<'_>> = frames
            .iter()
            .zip(envelopes.iter_mut())
            .map(|(pcm, envelope)| Lane {
                pcm: pcm.as_slice(),
                envelope,
            })
            .collect();
        let mut out = vec![0xAAu8; len];
        kernel.mix(&mut lanes, format, VolumeCurve::Linear, &mut out);
        out
    }

    fn constant_frame(format: &SampleFormat, raw: i32, samples: usize) -> Vec<u8> {
        let width = format.bit_depth.bytes();
        let mut pcm = vec![0u8; samples * width];
        for slot in pcm.chunks_exact_mut(width) {
            write_sample(format.bit_depth, raw, slot);
        }
        pcm
    }

    #[test]
    fn test_blend_properties() {
        assert_eq!(blend(0.0, 0.3), 0.3);
        assert_eq!(blend(0.5, 0.5), 0.75);
        assert_eq!(blend(1.0, 1.0), 0.0);
        assert_eq!(blend(1.0, -1.0), 0.0);
    }

    #[test]
    fn test_no_lanes_writes_silence() {
        for bits in [8u16, 16, 24, 32] {
            let format = SampleFormat::new(bits, 2, 8000).unwrap();
            let len = format.frame_len(20);
            let out = run(&PortableKernel, &format, &[], &mut [], len);
            assert!(out.iter().all(|b| *b == 0));
            let out = run(&BlockKernel, &format, &[], &mut [], len);
            assert!(out.iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_single_lane_passthrough() {
        let format = SampleFormat::new(16, 1, 8000).unwrap();
        let pcm = constant_frame(&format, 1000, 4);
        let mut envelopes = [Envelope::new(1.0)];
        let out = run(&PortableKernel, &format, &[pcm.clone()], &mut envelopes, pcm.len());
        for chunk in out.chunks_exact(2) {
            let value = read_sample(BitDepth::I16, chunk);
            assert!((999..=1000).contains(&value));
        }
    }

    #[test]
    fn test_volume_scales_sample() {
        let format = SampleFormat::new(16, 1, 8000).unwrap();
        let pcm = constant_frame(&format, 32767, 2);
        let mut envelopes = [Envelope::new(0.5)];
        let out = run(&PortableKernel, &format, &[pcm], &mut envelopes, 4);
        assert_eq!(read_sample(BitDepth::I16, &out), 16383);
    }

    #[test]
    fn test_fold_depends_on_order() {
        let format = SampleFormat::new(16, 1, 8000).unwrap();
        let high = constant_frame(&format, 16384, 1);
        let low = constant_frame(&format, -16384, 1);

        let mut envelopes = vec![Envelope::new(1.0); 3];
        let a = run(
            &PortableKernel,
            &format,
            &[high.clone(), high.clone(), low.clone()],
            &mut envelopes,
            2,
        );
        let mut envelopes = vec![Envelope::new(1.0); 3];
        let b = run(&PortableKernel, &format, &[low, high.clone(), high], &mut envelopes, 2);

        assert_ne!(read_sample(BitDepth::I16, &a), read_sample(BitDepth::I16, &b));
    }

    #[test]
    fn test_envelope_advances_once_per_sample_frame() {
        let format = SampleFormat::new(16, 2, 8000).unwrap();
        let pcm = constant_frame(&format, 0, 20);
        let mut envelopes = [Envelope::new(0.0)];
        envelopes[0].fade_to(1.0, 100);

        run(&PortableKernel, &format, &[pcm.clone()], &mut envelopes, pcm.len());
        assert_eq!(envelopes[0].transition().unwrap().elapsed_frames, 10);

        run(&BlockKernel, &format, &[pcm.clone()], &mut envelopes, pcm.len());
        assert_eq!(envelopes[0].transition().unwrap().elapsed_frames, 20);
    }

    #[test]
    fn test_select_falls_back_for_24bit() {
        assert_eq!(select_kernel(KernelChoice::Auto, BitDepth::I24).name(), "portable");
        assert_eq!(select_kernel(KernelChoice::Auto, BitDepth::I16).name(), "block");
        assert_eq!(select_kernel(KernelChoice::Portable, BitDepth::I16).name(), "portable");
    }

    fn depth_strategy() -> impl Strategy<Value = u16> {
        prop_oneof![Just(8u16), Just(16u16), Just(32u16)]
    }

    proptest! {
        #[test]
        fn prop_block_kernel_matches_portable(
            bits in depth_strategy(),
            channels in 1u16..=3,
            samples in 1usize..48,
            lane_count in 0usize..5,
            seed in proptest::collection::vec(any::<u8>(), 4096),
            fades in proptest::collection::vec((0.0f64..=1.0, 0.0f64..=1.0, 0u64..64), 5),
        ) {
            let format = SampleFormat::new(bits, channels, 8000).unwrap();
            let len = samples * format.sample_size();
            let frames: Vec<Vec<u8>> = (0..lane_count)
                .map(|i| seed.iter().cycle().skip(i * 97).take(len).copied().collect())
                .collect();

            let make_envelopes = || -> Vec<Envelope> {
                fades.iter().take(lane_count).map(|&(from, to, frames)| {
                    let mut env = Envelope::new(from);
                    env.fade_to(to, frames);
                    env
                }).collect()
            };

            let mut env_a = make_envelopes();
            let mut env_b = make_envelopes();
            let a = run(&PortableKernel, &format, &frames, &mut env_a, len);
            let b = run(&BlockKernel, &format, &frames, &mut env_b, len);

            prop_assert_eq!(a, b);
            prop_assert_eq!(env_a, env_b);
        }
    }
}
