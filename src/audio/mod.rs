//! Audio primitives shared by the mixer: sample format, per-source buffers
//! and the non-blocking input contract.

pub mod buffer;
pub mod format;
pub mod input;

pub use buffer::{BufferStats, SourceBuffer};
pub use format::{BitDepth, SampleFormat};
pub use input::{pcm_channel, pipe_reader, PcmInput, PcmReceiver, PcmSender, Pull};
