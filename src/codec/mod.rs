//! Integer PCM sample codecs
//!
//! Bit-depth-generic reading and writing of signed little-endian samples,
//! used by the mixing kernels and available to downstream consumers.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_sample, normalize, read_sample, SampleCodec};
pub use encoder::{encode_sample, quantize, write_sample};
