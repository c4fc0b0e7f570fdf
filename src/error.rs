//! Error types for the radio automation core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Misconfiguration detected before anything starts running.
///
/// These are fatal: they surface from constructors, never from a running tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Bit depth is not a multiple of 8: {0}")]
    BitDepthNotByteAligned(u16),

    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Channel count must be at least 1")]
    InvalidChannels,

    #[error("Sample rate must be non-zero")]
    InvalidSampleRate,

    #[error("Frame rate must be non-zero and below the sample rate")]
    InvalidFps,

    #[error("Loop size must be at least 1")]
    InvalidLoopSize,

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(String),
}

/// Failure of a single mixer input.
///
/// Non-fatal: it is captured on the source and handed back through the
/// removal notification once the source has drained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Read failed: {0}")]
    Read(String),

    #[error("Upstream producer failed: {0}")]
    Upstream(String),

    #[error("Source closed")]
    Closed,
}

/// Failure of a queued job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task rejected on start: {0}")]
    Rejected(String),

    #[error("Task dropped its completion without resolving it")]
    Abandoned,

    #[error("Task cannot be rebuilt from stored metadata: {0}")]
    NotReconstructible(String),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<SourceError> for TaskError {
    fn from(err: SourceError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Queue misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Completion resolved more than once")]
    AlreadyCompleted,

    #[error("Queue has no task codec configured")]
    NoCodec,

    #[error("Failed to serialize task metadata: {0}")]
    Serialize(String),
}

/// Snapshot file errors
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Snapshot IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot JSON invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot rejected: {0}")]
    Queue(#[from] QueueError),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
