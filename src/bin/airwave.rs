//! Airwave Daemon
//!
//! Plays the queued playlist, timed announcements and any pushed TCP
//! streams through the mixer and writes the raw PCM stream to stdout.
//!
//! Usage: `airwave [config.toml] | encoder ...`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use airwave::{
    audio::{pipe_reader, PcmInput, PcmReceiver, Pull},
    config::AppConfig,
    error::TaskError,
    mixer::{Mixer, MixerHandle},
    network::TcpIngest,
    queue::{persist, Control, Job, Queue, QueueEvent, SerdeCodec, TaskMetadata},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TrackKind {
    Song,
    Announcement,
}

impl TrackKind {
    fn label(self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::Announcement => "announcement",
        }
    }
}

/// What the queue stores for every playable file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Track {
    uid: String,
    path: PathBuf,
    title: String,
    kind: TrackKind,
}

impl TaskMetadata for Track {
    fn uid(&self) -> &str {
        &self.uid
    }
}

/// Ends the wrapped input early once `stop` is set.
struct Interruptible {
    inner: PcmReceiver,
    stop: Arc<AtomicBool>,
}

impl PcmInput for Interruptible {
    fn pull(&mut self, max: usize) -> Pull {
        if self.stop.load(Ordering::Relaxed) {
            return Pull::End;
        }
        self.inner.pull(max)
    }
}

/// Job that streams a raw PCM file into the mixer until it ends or is stopped.
fn play_file(mixer: MixerHandle, track: Track) -> Job {
    Job::from_async(move |mut controls| {
        let mixer = mixer.clone();
        let track = track.clone();
        async move {
            let file = tokio::fs::File::open(&track.path)
                .await
                .map_err(|e| TaskError::Rejected(format!("{}: {}", track.path.display(), e)))?;

            let stop = Arc::new(AtomicBool::new(false));
            let input = Interruptible {
                inner: pipe_reader(file),
                stop: stop.clone(),
            };
            let source = mixer.add_source(input, [track.kind.label()]);
            tracing::info!("Now playing: {} ({})", track.title, track.kind.label());

            let mut listening = true;
            loop {
                tokio::select! {
                    removed = source.removed() => {
                        return match removed {
                            Some(err) => Err(err.into()),
                            None => Ok(json!({
                                "title": track.title,
                                "stopped": stop.load(Ordering::Relaxed),
                            })),
                        };
                    }
                    control = controls.recv(), if listening => match control {
                        Some(Control::Stop) => {
                            tracing::info!("Stopping: {}", track.title);
                            source.set_volume(0.0);
                            stop.store(true, Ordering::Relaxed);
                        }
                        Some(Control::Custom(name)) => {
                            tracing::debug!("Ignoring control {:?} for {}", name, track.title);
                        }
                        None => listening = false,
                    },
                }
            }
        }
    })
}

fn track_codec(
    mixer: MixerHandle,
) -> SerdeCodec<Track, impl Fn(&Track) -> Result<Job, TaskError> + Send + Sync> {
    SerdeCodec::new(move |track: &Track| {
        if !track.path.exists() {
            return Err(TaskError::NotReconstructible(format!(
                "{} no longer exists",
                track.path.display()
            )));
        }
        Ok(play_file(mixer.clone(), track.clone()))
    })
}

fn save_queue(queue: &Queue<Track>, path: &Path) {
    match queue.snapshot() {
        Ok(snapshot) => {
            if let Err(e) = persist::save(path, &snapshot) {
                tracing::warn!("Failed to save queue to {}: {}", path.display(), e);
            }
        }
        Err(e) => tracing::warn!("Failed to snapshot queue: {}", e),
    }
}

/// Persist the queue whenever its contents or position change.
async fn persist_queue(queue: Queue<Track>, path: PathBuf) {
    let mut events = queue.subscribe();
    loop {
        match events.recv().await {
            Ok(QueueEvent::Pushed(_) | QueueEvent::Next(_) | QueueEvent::Unshifted(_)) => {
                let queue = queue.clone();
                let path = path.clone();
                let saved = tokio::task::spawn_blocking(move || save_queue(&queue, &path)).await;
                if let Err(e) = saved {
                    tracing::warn!("Queue save task failed: {}", e);
                }
            }
            Ok(QueueEvent::Failed { task, error }) => {
                tracing::warn!("Dropped {} from the queue: {}", task.metadata.title, error);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} queue events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Periodic one-shot announcement plus a once-a-minute kick for an idle queue.
async fn schedule(queue: Queue<Track>, mixer: MixerHandle, config: AppConfig) {
    let mut kick = tokio::time::interval(Duration::from_secs(60));
    let announce_every = Duration::from_secs(config.announcement.interval_secs.max(1));
    let mut announce = tokio::time::interval_at(tokio::time::Instant::now() + announce_every, announce_every);

    let announcement = Track {
        uid: format!("announcement://{}", config.announcement.path.display()),
        path: config.announcement.path.clone(),
        title: config.announcement.title.clone(),
        kind: TrackKind::Announcement,
    };

    loop {
        tokio::select! {
            _ = kick.tick() => {
                queue.start();
            }
            _ = announce.tick(), if config.announcement.enabled => {
                tracing::info!("Announcement time: {}", announcement.title);
                queue.unshift(play_file(mixer.clone(), announcement.clone()), announcement.clone());
                queue.start();
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout carries the audio
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing::info!("Starting {}", config.station.name);

    // Mixer; new sources fade in to their label's volume
    let mixer = Mixer::new(config.mixer.sample_format()?, config.mixer.options())?;
    let mixer = MixerHandle::new(mixer);

    // Queue, restored from the last run
    let queue = Queue::with_codec(config.queue.loop_size, track_codec(mixer.clone()))?;
    let state_path = config.queue.state_path();
    if let Some(path) = &state_path {
        match persist::load(path) {
            Ok(Some(snapshot)) => {
                let report = queue.restore(snapshot)?;
                tracing::info!(
                    "Restored {} queued tracks from {} ({} skipped)",
                    report.restored,
                    path.display(),
                    report.skipped
                );
            }
            Ok(None) => tracing::info!("No saved queue at {}", path.display()),
            Err(e) => tracing::warn!("Ignoring unreadable queue file {}: {}", path.display(), e),
        }
    }

    for entry in &config.playlist {
        let track = Track {
            uid: entry.uid(),
            path: entry.path.clone(),
            title: entry.title(),
            kind: TrackKind::Song,
        };
        if queue.find(&track.uid).is_none() {
            queue.push(play_file(mixer.clone(), track.clone()), track);
        }
    }
    tracing::info!("{} tracks queued", queue.len());

    if let Some(path) = state_path.clone() {
        tokio::spawn(persist_queue(queue.clone(), path));
    }
    tokio::spawn(schedule(queue.clone(), mixer.clone(), config.clone()));

    // Optional TCP ingest
    if config.ingest.enabled {
        let ingest = TcpIngest::bind(config.ingest.address(), mixer.clone(), vec!["tcp".to_string()])
            .await
            .with_context(|| format!("Failed to bind ingest on {}", config.ingest.address()))?;
        tokio::spawn(ingest.run());
    }

    // Output
    let (mut frames, mixer_task) = mixer.spawn();
    queue.start();

    let writer = async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = frames.recv().await {
            if let Err(e) = stdout.write_all(&frame).await {
                tracing::info!("Output closed: {}", e);
                break;
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }

    queue.signal(Control::Stop);
    mixer_task.abort();
    if let Some(path) = &state_path {
        save_queue(&queue, path);
    }

    let stats = mixer.stats();
    tracing::info!(
        "Mixed {} frames, {} sources played",
        stats.frames_mixed,
        stats.sources_removed
    );
    Ok(())
}
