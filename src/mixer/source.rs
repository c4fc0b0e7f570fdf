//! Mixer sources and the handles external code holds on them

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crate::audio::buffer::{BufferStats, SourceBuffer};
use crate::audio::input::{PcmInput, Pull};
use crate::error::SourceError;
use crate::mixer::envelope::{transition_frames, Envelope};

/// Identifier assigned at registration, increasing with registration order
pub type SourceId = u64;

/// Lifecycle as seen from a [`SourceHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    /// Drained and dropped from the mix, with the captured error if any
    Removed(Option<SourceError>),
}

/// Identity of a source, carried by mixer notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: SourceId,
    pub labels: Vec<String>,
}

/// Mixer notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    SourceAdded(SourceInfo),
    SourceRemoved {
        source: SourceInfo,
        error: Option<SourceError>,
    },
}

/// One mixer input, owned by the mixer while active.
pub(crate) struct Source {
    id: SourceId,
    labels: Arc<[String]>,
    input: Box<dyn PcmInput>,
    buffer: SourceBuffer,
    envelope: Arc<Mutex<Envelope>>,
    ended: bool,
    error: Option<SourceError>,
    status: watch::Sender<SourceStatus>,
    sample_rate: u32,
}

impl Source {
    pub(crate) fn new(
        id: SourceId,
        input: Box<dyn PcmInput>,
        labels: Vec<String>,
        envelope: Envelope,
        sample_rate: u32,
    ) -> Self {
        let (status, _) = watch::channel(SourceStatus::Active);
        Self {
            id,
            labels: labels.into(),
            input,
            buffer: SourceBuffer::new(),
            envelope: Arc::new(Mutex::new(envelope)),
            ended: false,
            error: None,
            status,
            sample_rate,
        }
    }

    pub(crate) fn id(&self) -> SourceId {
        self.id
    }

    pub(crate) fn info(&self) -> SourceInfo {
        SourceInfo {
            id: self.id,
            labels: self.labels.to_vec(),
        }
    }

    pub(crate) fn handle(&self) -> SourceHandle {
        SourceHandle {
            id: self.id,
            labels: self.labels.clone(),
            envelope: self.envelope.clone(),
            status: self.status.subscribe(),
            sample_rate: self.sample_rate,
        }
    }

    pub(crate) fn has_any_label(&self, labels: &[&str]) -> bool {
        labels.iter().any(|l| self.labels.iter().any(|own| own == l))
    }

    pub(crate) fn envelope(&self) -> &Arc<Mutex<Envelope>> {
        &self.envelope
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Issue one non-blocking read against the input.
    pub(crate) fn pull(&mut self, max: usize) {
        if self.ended {
            return;
        }
        match self.input.pull(max) {
            Pull::Data(bytes) => self.buffer.push(bytes),
            Pull::Pending => {}
            Pull::End => {
                tracing::debug!("[Mixer] Source {} reached end of stream", self.id);
                self.ended = true;
            }
            Pull::Failed(err) => {
                tracing::warn!("[Mixer] Source {} failed: {}", self.id, err);
                self.error = Some(err);
                self.ended = true;
            }
        }
    }

    /// Exactly `len` bytes for this tick.
    ///
    /// An ended source is padded with silence so it drains; a live source
    /// that is short contributes a silent frame and keeps its bytes.
    pub(crate) fn take_frame(&mut self, len: usize, silence: &Bytes) -> Bytes {
        if let Some(frame) = self.buffer.take(len) {
            return frame;
        }
        if self.ended {
            return self.buffer.take_padded(len);
        }
        self.buffer.record_underrun();
        silence.clone()
    }

    pub(crate) fn is_drained(&self, sample_size: usize) -> bool {
        self.ended && self.buffer.remaining_samples(sample_size) == 0
    }

    /// Publish removal to every handle and hand back the captured error.
    pub(crate) fn retire(self) -> (SourceInfo, Option<SourceError>) {
        let info = self.info();
        self.status
            .send_replace(SourceStatus::Removed(self.error.clone()));
        (info, self.error)
    }
}

/// External control over a registered source.
///
/// Cloneable and usable from any task; stays valid after the source is
/// removed, at which point volume changes are simply ignored by the mix.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    id: SourceId,
    labels: Arc<[String]>,
    envelope: Arc<Mutex<Envelope>>,
    status: watch::Receiver<SourceStatus>,
    sample_rate: u32,
}

impl SourceHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Whether the source carries `label`
    pub fn is(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Current volume scalar
    pub fn volume(&self) -> f64 {
        self.envelope.lock().volume()
    }

    pub fn is_transitioning(&self) -> bool {
        self.envelope.lock().is_transitioning()
    }

    /// Cancel any fade and set the volume immediately (clamped to `[0, 1]`).
    pub fn set_volume(&self, volume: f64) {
        self.envelope.lock().set_volume(volume);
    }

    /// Fade from the current volume to `volume` over `duration_ms`.
    pub fn fade_to(&self, volume: f64, duration_ms: u64) {
        let frames = transition_frames(duration_ms, self.sample_rate);
        self.envelope.lock().fade_to(volume, frames);
    }

    pub fn status(&self) -> SourceStatus {
        self.status.borrow().clone()
    }

    pub fn is_removed(&self) -> bool {
        matches!(*self.status.borrow(), SourceStatus::Removed(_))
    }

    /// Wait until the mixer drops this source; yields its captured error.
    ///
    /// If the mixer itself goes away first, reports [`SourceError::Closed`].
    pub async fn removed(&self) -> Option<SourceError> {
        let mut status = self.status.clone();
        loop {
            if let SourceStatus::Removed(err) = &*status.borrow_and_update() {
                return err.clone();
            }
            if status.changed().await.is_err() {
                return match &*status.borrow() {
                    SourceStatus::Removed(err) => err.clone(),
                    SourceStatus::Active => Some(SourceError::Closed),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::input::pcm_channel;

    fn source_with(labels: &[&str]) -> (crate::audio::PcmSender, Source) {
        let (tx, rx) = pcm_channel();
        let labels = labels.iter().map(|l| l.to_string()).collect();
        (tx, Source::new(1, Box::new(rx), labels, Envelope::default(), 8000))
    }

    #[test]
    fn test_live_underrun_keeps_bytes() {
        let (tx, mut source) = source_with(&["song"]);
        tx.send(vec![1u8; 6]).unwrap();
        source.pull(64);

        let silence = Bytes::from(vec![0u8; 8]);
        assert_eq!(source.take_frame(8, &silence), silence);
        assert_eq!(source.buffered(), 6);
        assert_eq!(source.buffer_stats().underruns, 1);
    }

    #[test]
    fn test_ended_source_is_padded() {
        let (tx, mut source) = source_with(&["song"]);
        tx.send(vec![1u8; 6]).unwrap();
        drop(tx);
        source.pull(64);
        source.pull(64);
        assert!(source.is_ended());

        let silence = Bytes::from(vec![0u8; 8]);
        let frame = source.take_frame(8, &silence);
        assert_eq!(frame.as_ref(), &[1, 1, 1, 1, 1, 1, 0, 0]);
        assert!(source.is_drained(4));
    }

    #[test]
    fn test_error_is_captured_on_retire() {
        let (tx, mut source) = source_with(&["tcp"]);
        let handle = source.handle();
        tx.fail(SourceError::Read("connection reset".into()));
        source.pull(64);
        assert!(source.is_ended());

        let (info, error) = source.retire();
        assert_eq!(info.labels, vec!["tcp".to_string()]);
        assert_eq!(error, Some(SourceError::Read("connection reset".into())));
        assert_eq!(
            handle.status(),
            SourceStatus::Removed(Some(SourceError::Read("connection reset".into())))
        );
    }

    #[test]
    fn test_handle_volume_controls() {
        let (_tx, source) = source_with(&["song", "microphone"]);
        let handle = source.handle();
        assert!(handle.is("microphone"));
        assert!(!handle.is("tcp"));
        assert!(source.has_any_label(&["tcp", "song"]));

        handle.set_volume(1.7);
        assert_eq!(handle.volume(), 1.0);

        handle.fade_to(0.0, 500);
        let envelope = source.envelope().lock();
        let transition = envelope.transition().unwrap();
        assert_eq!(transition.total_frames, 4000);
        assert_eq!(transition.from, 1.0);
    }

    #[tokio::test]
    async fn test_removed_resolves_after_retire() {
        let (tx, source) = source_with(&["song"]);
        let handle = source.handle();
        drop(tx);

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.removed().await }
        });
        tokio::task::yield_now().await;

        let _ = source.retire();
        assert_eq!(waiter.await.unwrap(), None);
        assert!(handle.is_removed());
    }
}
