//! Frame-clocked multi-source PCM mixer
//!
//! ```text
//! PcmInput ──pull──► SourceBuffer ──frame──┐
//! PcmInput ──pull──► SourceBuffer ──frame──┼──► MixKernel ──► output frame
//! PcmInput ──pull──► SourceBuffer ──frame──┘        ▲
//!                                        Envelope per source
//! ```

pub mod clock;
pub mod engine;
pub mod envelope;
pub mod kernel;
pub mod runner;
pub mod source;

pub use clock::TickClock;
pub use engine::{Mixer, MixerOptions, MixerStats};
pub use envelope::{transition_frames, Envelope, FadeIn, Transition, VolumeCurve};
pub use kernel::{blend, select_kernel, BlockKernel, KernelChoice, Lane, MixKernel, PortableKernel};
pub use runner::MixerHandle;
pub use source::{MixerEvent, SourceHandle, SourceId, SourceInfo, SourceStatus};
