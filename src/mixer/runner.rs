//! Real-time driver for a [`Mixer`]
//!
//! The mixer sits behind a shared lock so sources can be added from any
//! task while the clocked loop keeps ticking. Frames go out through an
//! unbounded channel: the loop never waits on its consumer.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::format::SampleFormat;
use crate::audio::input::PcmInput;
use crate::mixer::clock::TickClock;
use crate::mixer::engine::{Mixer, MixerStats};
use crate::mixer::source::{MixerEvent, SourceHandle};

/// Shared, cloneable access to a running mixer
#[derive(Clone)]
pub struct MixerHandle {
    inner: Arc<Mutex<Mixer>>,
    format: SampleFormat,
    fps: u32,
    frame_len: usize,
}

impl MixerHandle {
    pub fn new(mixer: Mixer) -> Self {
        Self {
            format: *mixer.format(),
            fps: mixer.fps(),
            frame_len: mixer.frame_len(),
            inner: Arc::new(Mutex::new(mixer)),
        }
    }

    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn add_source<I, L>(&self, input: I, labels: L) -> SourceHandle
    where
        I: PcmInput + 'static,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        self.inner.lock().add_source(input, labels)
    }

    pub fn sources(&self, labels: &[&str]) -> Vec<SourceHandle> {
        self.inner.lock().sources(labels)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count()
    }

    pub fn stats(&self) -> MixerStats {
        self.inner.lock().stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MixerEvent> {
        self.inner.lock().subscribe()
    }

    /// Mix one frame outside the clocked loop.
    pub fn tick(&self) -> Bytes {
        self.inner.lock().tick()
    }

    /// Emit one frame per period until `output` is closed.
    ///
    /// A late tick is emitted immediately and the next deadline is still
    /// taken from the fixed schedule, so the stream catches up instead of
    /// drifting.
    pub async fn run(self, output: mpsc::UnboundedSender<Bytes>) {
        let mut clock = TickClock::new(Instant::now(), self.fps);
        let mut behind = false;

        tracing::info!(
            "[Mixer] Clock started at {} fps ({} bytes/frame)",
            self.fps,
            self.frame_len
        );

        loop {
            let frame = self.tick();
            if output.send(frame).is_err() {
                tracing::info!("[Mixer] Output closed after {} frames", clock.index());
                break;
            }

            let deadline = clock.advance();
            let lag = clock.lag(Instant::now());
            if lag > clock.period() {
                if !behind {
                    tracing::warn!("[Mixer] Falling behind schedule by {:?}", lag);
                    behind = true;
                }
            } else {
                behind = false;
            }

            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Start the clocked loop on the runtime.
    pub fn spawn(&self) -> (mpsc::UnboundedReceiver<Bytes>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.clone().run(tx));
        (rx, task)
    }
}
