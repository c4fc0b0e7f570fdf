//! # Airwave
//!
//! Radio automation core: a frame-clocked PCM mixer and a rotating content
//! queue for continuous internet radio.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                           CONTENT QUEUE (queue)                         │
//! │  ┌──────────────┐   ┌───────────────────────────────┐   ┌───────────┐  │
//! │  │ Prepend list │──►│ Rotation [fresh ... | aged]    │◄──│ Overflow  │  │
//! │  │  (one-shot)  │   │   capacity = loop size        │   │  (FIFO)   │  │
//! │  └──────────────┘   └───────────────┬───────────────┘   └───────────┘  │
//! │                                     │ one job at a time                 │
//! └─────────────────────────────────────┼──────────────────────────────────┘
//!                                       ▼
//!                 job opens a PCM stream and adds it as a source
//!                                       │
//! ┌─────────────────────────────────────┼──────────────────────────────────┐
//! │                               MIXER (mixer)                             │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                       │
//! │  │ Source     │   │ Source     │   │ Source     │  ◄── TCP ingest       │
//! │  │ "song"     │   │ "tcp"      │   │ "mic"      │      (network)        │
//! │  │ buffer+env │   │ buffer+env │   │ buffer+env │                       │
//! │  └─────┬──────┘   └─────┬──────┘   └─────┬──────┘                       │
//! │        └────────────────┼────────────────┘                              │
//! │                         ▼                                               │
//! │               MixKernel (blend fold)  ◄── TickClock, fps frames/s       │
//! └─────────────────────────┬──────────────────────────────────────────────┘
//!                           ▼
//!                 fixed-size PCM frames out
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod mixer;
pub mod network;
pub mod queue;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default sample width in bits
    pub const DEFAULT_BIT_DEPTH: u16 = 16;

    /// Default output frames per second
    pub const DEFAULT_FPS: u32 = 20;

    /// Frames buffered per source before reads pause
    pub const PREFETCH_FRAMES: usize = 8;

    /// Frames requested per fill read
    pub const PULL_FRAMES: usize = 4;

    /// Default fade-in for new sources
    pub const DEFAULT_FADE_IN_MS: u64 = 1000;

    /// Default rotation capacity
    pub const DEFAULT_LOOP_SIZE: usize = 10;

    /// Default TCP port for pushed PCM
    pub const DEFAULT_INGEST_PORT: u16 = 5000;

    /// Default interval between timed announcements
    pub const DEFAULT_ANNOUNCEMENT_INTERVAL_SECS: u64 = 900;

    /// Broadcast capacity for mixer and queue notifications
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}
