//! Queue snapshots
//!
//! Jobs are code and cannot be stored. A snapshot keeps each task's
//! metadata and bookkeeping; a [`TaskCodec`] turns metadata back into a
//! runnable job on restore.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::{PersistError, QueueError, TaskError};
use crate::queue::task::Job;

/// Stored form of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub init_time: i64,
    #[serde(default)]
    pub exec_count: u32,
    pub metadata: Value,
}

/// Stored form of the whole queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Aged tail length of `items`
    #[serde(default)]
    pub old: usize,
    #[serde(default)]
    pub items: Vec<TaskRecord>,
    #[serde(default)]
    pub exceed_items: Vec<TaskRecord>,
    #[serde(default)]
    pub prepend_list: Vec<TaskRecord>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.items.len() + self.exceed_items.len() + self.prepend_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of restoring a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreReport {
    pub restored: usize,
    /// Entries whose job could not be rebuilt, or duplicates
    pub skipped: usize,
}

/// Converts task metadata to and from its stored form.
pub trait TaskCodec<M>: Send + Sync {
    fn encode(&self, metadata: &M) -> Result<Value, QueueError>;

    /// Rebuild metadata and the job that runs it.
    fn decode(&self, value: Value) -> Result<(M, Job), TaskError>;
}

/// Codec for serde metadata with a job factory.
pub struct SerdeCodec<M, F> {
    factory: F,
    _metadata: PhantomData<fn() -> M>,
}

impl<M, F> SerdeCodec<M, F>
where
    F: Fn(&M) -> Result<Job, TaskError>,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _metadata: PhantomData,
        }
    }
}

impl<M, F> TaskCodec<M> for SerdeCodec<M, F>
where
    M: Serialize + DeserializeOwned,
    F: Fn(&M) -> Result<Job, TaskError> + Send + Sync,
{
    fn encode(&self, metadata: &M) -> Result<Value, QueueError> {
        serde_json::to_value(metadata).map_err(|e| QueueError::Serialize(e.to_string()))
    }

    fn decode(&self, value: Value) -> Result<(M, Job), TaskError> {
        let metadata: M = serde_json::from_value(value)
            .map_err(|e| TaskError::NotReconstructible(e.to_string()))?;
        let job = (self.factory)(&metadata)?;
        Ok((metadata, job))
    }
}

/// Write a snapshot atomically: temp file in the same directory, then rename.
pub fn save(path: &Path, snapshot: &QueueSnapshot) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    tracing::debug!("[Queue] Saved {} tasks to {}", snapshot.len(), path.display());
    Ok(())
}

/// Read a snapshot; `None` when no file exists yet.
pub fn load(path: &Path) -> Result<Option<QueueSnapshot>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Track {
        uid: String,
        path: String,
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("airwave-persist-{}-{}", std::process::id(), name))
            .join("song_queue.json")
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = QueueSnapshot {
            old: 1,
            items: vec![TaskRecord {
                init_time: 1_700_000_000_000,
                exec_count: 3,
                metadata: json!({"uid": "a"}),
            }],
            exceed_items: vec![],
            prepend_list: vec![],
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            value,
            json!({
                "old": 1,
                "items": [{"initTime": 1_700_000_000_000i64, "execCount": 3, "metadata": {"uid": "a"}}],
                "exceedItems": [],
                "prependList": []
            })
        );
    }

    #[test]
    fn test_missing_fields_default() {
        let snapshot: QueueSnapshot =
            serde_json::from_value(json!({"items": [{"initTime": 5, "metadata": null}]})).unwrap();
        assert_eq!(snapshot.old, 0);
        assert_eq!(snapshot.items[0].exec_count, 0);
        assert!(snapshot.prepend_list.is_empty());
    }

    #[test]
    fn test_serde_codec() {
        let codec = SerdeCodec::new(|track: &Track| {
            if track.path.is_empty() {
                Err(TaskError::NotReconstructible("no path".into()))
            } else {
                Ok(Job::ready(json!(track.path)))
            }
        });

        let track = Track {
            uid: "a".into(),
            path: "/music/a.pcm".into(),
        };
        let value = codec.encode(&track).unwrap();
        let (decoded, _job) = codec.decode(value).unwrap();
        assert_eq!(decoded, track);

        assert!(matches!(
            codec.decode(json!({"uid": "b", "path": ""})),
            Err(TaskError::NotReconstructible(_))
        ));
        assert!(matches!(
            codec.decode(json!(42)),
            Err(TaskError::NotReconstructible(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("save");
        assert_eq!(load(&path).unwrap(), None);

        let snapshot = QueueSnapshot {
            old: 0,
            items: vec![],
            exceed_items: vec![],
            prepend_list: vec![TaskRecord {
                init_time: 7,
                exec_count: 0,
                metadata: json!("x"),
            }],
        };
        save(&path, &snapshot).unwrap();
        assert_eq!(load(&path).unwrap(), Some(snapshot));
        assert!(!path.with_extension("json.tmp").exists());

        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(load(&path), Err(PersistError::Json(_))));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
