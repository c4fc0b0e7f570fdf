//! Per-source volume envelope
//!
//! A transition moves the volume from one scalar to another over a fixed
//! number of sample frames. Progress is mapped through a cubic curve read
//! from a precomputed table so every kernel sees the same values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Lookup table resolution for the easing and gain curves
pub const TABLE_SIZE: usize = 4000;

fn easing_table() -> &'static [f64] {
    static TABLE: OnceLock<Vec<f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..TABLE_SIZE)
            .map(|i| {
                let x = i as f64 / (TABLE_SIZE - 1) as f64;
                x * x * x
            })
            .collect()
    })
}

fn perceptual_table() -> &'static [f64] {
    static TABLE: OnceLock<Vec<f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..TABLE_SIZE)
            .map(|i| {
                let x = i as f64 / (TABLE_SIZE - 1) as f64;
                10f64.powf((1.0 - x) * -3.0)
            })
            .collect()
    })
}

#[inline]
fn table_index(x: f64) -> usize {
    (x.clamp(0.0, 1.0) * (TABLE_SIZE - 1) as f64) as usize
}

/// Interpolate between `from` and `to` at `progress` along the easing curve.
#[inline]
pub fn ease(progress: f64, from: f64, to: f64) -> f64 {
    from + easing_table()[table_index(progress)] * (to - from)
}

/// How a source's volume scalar becomes a sample gain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeCurve {
    /// Gain equals volume
    #[default]
    Linear,
    /// Gain is `10^((1 - volume) * -3)`, a 60 dB taper
    Perceptual,
}

impl VolumeCurve {
    #[inline]
    pub fn gain(self, volume: f64) -> f64 {
        match self {
            Self::Linear => volume,
            Self::Perceptual => perceptual_table()[table_index(volume)],
        }
    }
}

/// An in-flight volume change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: f64,
    pub to: f64,
    pub elapsed_frames: u64,
    pub total_frames: u64,
}

/// Volume state of one source
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    volume: f64,
    transition: Option<Transition>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            volume: 1.0,
            transition: None,
        }
    }
}

impl Envelope {
    pub fn new(volume: f64) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            transition: None,
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn transition(&self) -> Option<&Transition> {
        self.transition.as_ref()
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    /// Cancel any transition and jump straight to `volume`.
    pub fn set_volume(&mut self, volume: f64) {
        self.transition = None;
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Start a transition from the current volume to `volume` over
    /// `total_frames` sample frames.
    ///
    /// A zero-length transition applies the target immediately.
    pub fn fade_to(&mut self, volume: f64, total_frames: u64) {
        let to = volume.clamp(0.0, 1.0);
        if total_frames == 0 {
            self.set_volume(to);
            return;
        }
        self.transition = Some(Transition {
            from: self.volume,
            to,
            elapsed_frames: 0,
            total_frames,
        });
    }

    /// Step the transition by one sample frame.
    #[inline]
    pub fn advance(&mut self) {
        let Some(t) = self.transition.as_mut() else {
            return;
        };
        t.elapsed_frames += 1;
        let progress = t.elapsed_frames as f64 / t.total_frames as f64;
        self.volume = ease(progress, t.from, t.to).clamp(0.0, 1.0);
        if t.elapsed_frames >= t.total_frames {
            self.volume = t.to;
            self.transition = None;
        }
    }
}

/// Transition length in sample frames for a duration in milliseconds
pub fn transition_frames(duration_ms: u64, sample_rate: u32) -> u64 {
    (duration_ms as f64 / 1000.0 * sample_rate as f64).floor() as u64
}

/// Starting envelope for new sources: silent, fading up to a volume chosen
/// by label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FadeIn {
    pub duration_ms: u64,
    /// Target volume per label. Unlisted labels fade to 1.0.
    pub label_volumes: BTreeMap<String, f64>,
}

impl FadeIn {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            label_volumes: BTreeMap::new(),
        }
    }

    pub fn with_volume(mut self, label: impl Into<String>, volume: f64) -> Self {
        self.label_volumes.insert(label.into(), volume);
        self
    }

    /// Loudest configured volume among `labels`, or 1.0 when none is set.
    pub fn target<S: AsRef<str>>(&self, labels: &[S]) -> f64 {
        labels
            .iter()
            .filter_map(|l| self.label_volumes.get(l.as_ref()).copied())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
            .unwrap_or(1.0)
            .clamp(0.0, 1.0)
    }

    pub fn envelope<S: AsRef<str>>(&self, labels: &[S], sample_rate: u32) -> Envelope {
        let mut envelope = Envelope::new(0.0);
        envelope.fade_to(
            self.target(labels),
            transition_frames(self.duration_ms, sample_rate),
        );
        envelope
    }
}
