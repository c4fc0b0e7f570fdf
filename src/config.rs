//! Daemon configuration
//!
//! Loaded from TOML. Every section and field is optional; missing values
//! fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::audio::format::SampleFormat;
use crate::constants::*;
use crate::error::ConfigError;
use crate::mixer::engine::MixerOptions;
use crate::mixer::envelope::{FadeIn, VolumeCurve};
use crate::mixer::kernel::KernelChoice;

/// Snapshot file name inside the data directory
pub const STATE_FILE: &str = "song_queue.json";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub station: StationConfig,
    pub mixer: MixerConfig,
    pub queue: QueueConfig,
    pub ingest: IngestConfig,
    pub announcement: AnnouncementConfig,
    /// Raw PCM files pushed into the rotation on startup
    pub playlist: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub name: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: "Airwave".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub bit_depth: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub fps: u32,
    /// Fade-in applied to every new source
    pub fade_in_ms: u64,
    pub kernel: KernelChoice,
    pub volume_curve: VolumeCurve,
    /// Target volume per source label after the fade-in
    pub label_volumes: BTreeMap<String, f64>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        let label_volumes = ["song", "tcp", "microphone"]
            .into_iter()
            .map(|label| (label.to_string(), 1.0))
            .collect();
        Self {
            bit_depth: DEFAULT_BIT_DEPTH,
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            fps: DEFAULT_FPS,
            fade_in_ms: DEFAULT_FADE_IN_MS,
            kernel: KernelChoice::default(),
            volume_curve: VolumeCurve::default(),
            label_volumes,
        }
    }
}

impl MixerConfig {
    pub fn sample_format(&self) -> Result<SampleFormat, ConfigError> {
        SampleFormat::new(self.bit_depth, self.channels, self.sample_rate)
    }

    pub fn options(&self) -> MixerOptions {
        MixerOptions {
            fps: self.fps,
            kernel: self.kernel,
            volume_curve: self.volume_curve,
            fade_in: Some(self.fade_in()),
        }
    }

    /// Every new source starts silent and fades to its label's volume.
    pub fn fade_in(&self) -> FadeIn {
        FadeIn {
            duration_ms: self.fade_in_ms,
            label_volumes: self.label_volumes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Rotation capacity
    pub loop_size: usize,
    /// Snapshot file; defaults to the platform data directory
    pub state_file: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            loop_size: DEFAULT_LOOP_SIZE,
            state_file: None,
        }
    }
}

impl QueueConfig {
    /// Resolved snapshot path, if any location is available.
    pub fn state_path(&self) -> Option<PathBuf> {
        self.state_file
            .clone()
            .or_else(|| AppConfig::data_dir().map(|dir| dir.join(STATE_FILE)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_INGEST_PORT,
        }
    }
}

impl IngestConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Timed one-shot announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncementConfig {
    pub enabled: bool,
    /// Raw PCM file to play
    pub path: PathBuf,
    pub title: String,
    pub interval_secs: u64,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            title: "Announcement".to_string(),
            interval_secs: DEFAULT_ANNOUNCEMENT_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Dedup key; defaults to the file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PlaylistEntry {
    pub fn uid(&self) -> String {
        self.uid
            .clone()
            .unwrap_or_else(|| format!("file://{}", self.path.display()))
    }

    pub fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when it exists,
    /// otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", "airwave")
    }

    /// `<config dir>/airwave/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Reject values that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let format = self.mixer.sample_format()?;
        if self.mixer.fps == 0 || format.frame_len(self.mixer.fps) == 0 {
            return Err(ConfigError::InvalidFps);
        }
        if self.queue.loop_size == 0 {
            return Err(ConfigError::InvalidLoopSize);
        }
        if self.announcement.enabled && self.announcement.interval_secs == 0 {
            return Err(ConfigError::Parse(
                "announcement.interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
