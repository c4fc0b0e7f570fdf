//! Synchronous mixing core
//!
//! [`Mixer`] owns the active sources and produces exactly one output frame
//! per [`Mixer::tick`]. Timing lives elsewhere (see [`super::runner`]), so
//! everything here can be driven deterministically from tests.

use bytes::Bytes;
use parking_lot::MutexGuard;
use tokio::sync::broadcast;

use crate::audio::format::SampleFormat;
use crate::audio::input::PcmInput;
use crate::constants::{EVENT_CHANNEL_CAPACITY, PREFETCH_FRAMES, PULL_FRAMES};
use crate::error::ConfigError;
use crate::mixer::envelope::{Envelope, FadeIn, VolumeCurve};
use crate::mixer::kernel::{select_kernel, KernelChoice, Lane, MixKernel};
use crate::mixer::source::{MixerEvent, Source, SourceHandle, SourceId};

/// Tunables that do not change the stream format
#[derive(Debug, Clone, PartialEq)]
pub struct MixerOptions {
    /// Output frames per second
    pub fps: u32,
    pub kernel: KernelChoice,
    pub volume_curve: VolumeCurve,
    /// Envelope every new source starts with; full volume when unset
    pub fade_in: Option<FadeIn>,
}

impl Default for MixerOptions {
    fn default() -> Self {
        Self {
            fps: crate::constants::DEFAULT_FPS,
            kernel: KernelChoice::default(),
            volume_curve: VolumeCurve::default(),
            fade_in: None,
        }
    }
}

/// Mixer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixerStats {
    pub frames_mixed: u64,
    pub sources_added: u64,
    pub sources_removed: u64,
    pub active_sources: usize,
}

pub struct Mixer {
    format: SampleFormat,
    fps: u32,
    frame_len: usize,
    high_water_mark: usize,
    read_size: usize,
    silence: Bytes,
    kernel: Box<dyn MixKernel>,
    volume_curve: VolumeCurve,
    fade_in: Option<FadeIn>,
    sources: Vec<Source>,
    next_id: SourceId,
    events: broadcast::Sender<MixerEvent>,
    stats: MixerStats,
}

impl Mixer {
    pub fn new(format: SampleFormat, options: MixerOptions) -> Result<Self, ConfigError> {
        if options.fps == 0 {
            return Err(ConfigError::InvalidFps);
        }
        let frame_len = format.frame_len(options.fps);
        if frame_len == 0 {
            return Err(ConfigError::InvalidFps);
        }

        let kernel = select_kernel(options.kernel, format.bit_depth);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            "[Mixer] Created: {} Hz, {} ch, {}-bit, {} fps, {} bytes/frame, {} kernel",
            format.sample_rate,
            format.channels,
            format.bit_depth.bits(),
            options.fps,
            frame_len,
            kernel.name()
        );

        Ok(Self {
            format,
            fps: options.fps,
            frame_len,
            high_water_mark: frame_len * PREFETCH_FRAMES,
            read_size: frame_len * PULL_FRAMES,
            silence: Bytes::from(vec![0u8; frame_len]),
            kernel,
            volume_curve: options.volume_curve,
            fade_in: options.fade_in,
            sources: Vec::new(),
            next_id: 1,
            events,
            stats: MixerStats::default(),
        })
    }

    /// Build from raw format numbers with default options.
    pub fn with_format(bit_depth: u16, channels: u16, sample_rate: u32) -> Result<Self, ConfigError> {
        Self::new(
            SampleFormat::new(bit_depth, channels, sample_rate)?,
            MixerOptions::default(),
        )
    }

    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Bytes per output frame
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Number of active sources
    pub fn count(&self) -> usize {
        self.sources.len()
    }

    pub fn stats(&self) -> MixerStats {
        MixerStats {
            active_sources: self.sources.len(),
            ..self.stats.clone()
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MixerEvent> {
        self.events.subscribe()
    }

    /// Register a new input and prime its buffer.
    ///
    /// The source starts with the fade-in envelope when one is configured,
    /// otherwise at volume 1.0, and joins the mix on the next tick.
    pub fn add_source<I, L>(&mut self, input: I, labels: L) -> SourceHandle
    where
        I: PcmInput + 'static,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        let id = self.next_id;
        self.next_id += 1;

        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let envelope = match &self.fade_in {
            Some(fade_in) => fade_in.envelope(&labels, self.format.sample_rate),
            None => Envelope::default(),
        };
        let mut source = Source::new(id, Box::new(input), labels, envelope, self.format.sample_rate);
        source.pull(self.high_water_mark);

        let handle = source.handle();
        let info = source.info();
        self.sources.push(source);
        self.stats.sources_added += 1;

        tracing::info!(
            "[Mixer] Source {} added {:?} ({} active)",
            id,
            info.labels,
            self.sources.len()
        );
        let _ = self.events.send(MixerEvent::SourceAdded(info));

        handle
    }

    /// Handles for sources carrying any of `labels`; all sources when empty.
    pub fn sources(&self, labels: &[&str]) -> Vec<SourceHandle> {
        self.sources
            .iter()
            .filter(|s| labels.is_empty() || s.has_any_label(labels))
            .map(Source::handle)
            .collect()
    }

    /// Produce one output frame.
    pub fn tick(&mut self) -> Bytes {
        self.fill();

        let output = if self.sources.is_empty() {
            self.silence.clone()
        } else {
            let len = self.frame_len;
            let silence = &self.silence;
            let frames: Vec<Bytes> = self
                .sources
                .iter_mut()
                .map(|s| s.take_frame(len, silence))
                .collect();

            let mut guards: Vec<MutexGuard<'_, Envelope>> =
                self.sources.iter().map(|s| s.envelope().lock()).collect();
            let mut lanes: Vec<Lane<'_>> = frames
                .iter()
                .zip(guards.iter_mut())
                .map(|(pcm, guard)| Lane {
                    pcm: pcm.as_ref(),
                    envelope: &mut **guard,
                })
                .collect();

            let mut out = vec![0u8; len];
            self.kernel
                .mix(&mut lanes, &self.format, self.volume_curve, &mut out);
            Bytes::from(out)
        };

        self.stats.frames_mixed += 1;
        self.sweep();
        output
    }

    /// Top up every live source below the high-water mark with one read.
    fn fill(&mut self) {
        let (high_water_mark, read_size) = (self.high_water_mark, self.read_size);
        for source in self.sources.iter_mut() {
            if !source.is_ended() && source.buffered() < high_water_mark {
                source.pull(read_size);
            }
        }
    }

    /// Drop ended sources with no whole sample frame left.
    fn sweep(&mut self) {
        let sample_size = self.format.sample_size();
        if !self.sources.iter().any(|s| s.is_drained(sample_size)) {
            return;
        }

        let (drained, active): (Vec<Source>, Vec<Source>) = std::mem::take(&mut self.sources)
            .into_iter()
            .partition(|s| s.is_drained(sample_size));
        self.sources = active;

        for source in drained {
            let id = source.id();
            let (info, error) = source.retire();
            self.stats.sources_removed += 1;
            match &error {
                Some(err) => tracing::warn!(
                    "[Mixer] Source {} removed after error: {} ({} active)",
                    id,
                    err,
                    self.sources.len()
                ),
                None => tracing::info!(
                    "[Mixer] Source {} removed ({} active)",
                    id,
                    self.sources.len()
                ),
            }
            let _ = self.events.send(MixerEvent::SourceRemoved {
                source: info,
                error,
            });
        }
    }
}
