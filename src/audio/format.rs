//! Sample format and frame geometry
//!
//! All PCM handled by the mixer is signed, little-endian, interleaved.

use crate::error::ConfigError;

/// Supported integer sample widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitDepth {
    I8,
    I16,
    I24,
    I32,
}

impl BitDepth {
    /// Validate a raw bit count.
    pub fn from_bits(bits: u16) -> Result<Self, ConfigError> {
        if bits % 8 != 0 {
            return Err(ConfigError::BitDepthNotByteAligned(bits));
        }
        match bits {
            8 => Ok(Self::I8),
            16 => Ok(Self::I16),
            24 => Ok(Self::I24),
            32 => Ok(Self::I32),
            other => Err(ConfigError::UnsupportedBitDepth(other)),
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::I8 => 8,
            Self::I16 => 16,
            Self::I24 => 24,
            Self::I32 => 32,
        }
    }

    /// Bytes per single-channel sample
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest positive value, used as the normalization divisor.
    pub fn max_value(self) -> f64 {
        ((1u64 << (self.bits() - 1)) - 1) as f64
    }
}

/// Shape of the PCM stream: bit depth, channel count and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    pub bit_depth: BitDepth,
    pub channels: u16,
    pub sample_rate: u32,
}

impl SampleFormat {
    pub fn new(bits: u16, channels: u16, sample_rate: u32) -> Result<Self, ConfigError> {
        let bit_depth = BitDepth::from_bits(bits)?;
        if channels == 0 {
            return Err(ConfigError::InvalidChannels);
        }
        if sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        Ok(Self {
            bit_depth,
            channels,
            sample_rate,
        })
    }

    /// Bytes per interleaved sample frame (all channels).
    pub fn sample_size(&self) -> usize {
        self.bit_depth.bytes() * self.channels as usize
    }

    /// Bytes produced per tick at `fps`, rounded down to whole sample frames.
    pub fn frame_len(&self, fps: u32) -> usize {
        let size = self.sample_size();
        let raw = self.sample_rate as usize * size / fps as usize;
        raw / size * size
    }
}
