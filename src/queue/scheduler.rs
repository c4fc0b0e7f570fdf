//! The content queue and its run loop
//!
//! [`Queue`] is a cheap cloneable handle. All bookkeeping sits behind one
//! lock; jobs are always started and awaited outside of it so a job may
//! call back into the queue (push, remove, signal) from anywhere.

use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{ConfigError, QueueError, TaskError};
use crate::queue::events::QueueEvent;
use crate::queue::persist::{QueueSnapshot, RestoreReport, TaskCodec, TaskRecord};
use crate::queue::rotation::{Region, Rotation, Shifted};
use crate::queue::task::{
    panic_message, Completion, Control, ControlHandle, Job, TaskId, TaskInfo, TaskMetadata,
    TaskResult, TaskWrapper,
};

struct State<M> {
    rotation: Rotation<M>,
    next_id: TaskId,
    running: bool,
    current: Option<TaskInfo<M>>,
    control: Option<ControlHandle>,
}

struct Shared<M> {
    state: Mutex<State<M>>,
    events: broadcast::Sender<QueueEvent<M>>,
    codec: Option<Arc<dyn TaskCodec<M>>>,
}

/// Bounded rotating queue of jobs with one-shot and overflow lists
pub struct Queue<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for Queue<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M: TaskMetadata> Queue<M> {
    /// Queue whose rotation holds at most `loop_size` tasks.
    pub fn new(loop_size: usize) -> Result<Self, ConfigError> {
        Self::build(loop_size, None)
    }

    /// Queue that can be snapshotted and restored through `codec`.
    pub fn with_codec(
        loop_size: usize,
        codec: impl TaskCodec<M> + 'static,
    ) -> Result<Self, ConfigError> {
        Self::build(loop_size, Some(Arc::new(codec)))
    }

    fn build(loop_size: usize, codec: Option<Arc<dyn TaskCodec<M>>>) -> Result<Self, ConfigError> {
        if loop_size == 0 {
            return Err(ConfigError::InvalidLoopSize);
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    rotation: Rotation::new(loop_size),
                    next_id: 1,
                    running: false,
                    current: None,
                    control: None,
                }),
                events,
                codec,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<M>> {
        self.shared.events.subscribe()
    }

    fn emit(&self, event: QueueEvent<M>) {
        let _ = self.shared.events.send(event);
    }

    fn emit_removed(&self, removed: Vec<TaskWrapper<M>>) {
        for task in removed {
            self.emit(QueueEvent::Removed {
                task: task.info(),
                error: None,
            });
        }
    }

    /// Add a task to the rotation, replacing any task with the same uid.
    pub fn push(&self, job: Job, metadata: M) -> TaskId {
        let mut state = self.shared.state.lock();
        let task = TaskWrapper::new(state.next_id, job, metadata);
        state.next_id += 1;

        let id = task.id;
        let info = task.info();
        let mut removed = Vec::new();
        let region = state.rotation.push(task, &mut removed);

        tracing::debug!(
            "[Queue] Pushed {} ({}) into {:?}, length {}",
            info.uid(),
            id,
            region,
            state.rotation.len()
        );
        if region == Region::Overflow {
            tracing::info!("[Queue] Rotation full, {} waiting in overflow", info.uid());
        }
        self.emit_removed(removed);
        self.emit(QueueEvent::Pushed(info));
        id
    }

    /// Add a one-shot task that runs before the rotation continues.
    pub fn unshift(&self, job: Job, metadata: M) -> TaskId {
        let mut state = self.shared.state.lock();
        let task = TaskWrapper::new(state.next_id, job, metadata);
        state.next_id += 1;

        let id = task.id;
        let info = task.info();
        let mut removed = Vec::new();
        state.rotation.unshift(task, &mut removed);

        tracing::debug!("[Queue] Unshifted {} ({})", info.uid(), id);
        self.emit_removed(removed);
        self.emit(QueueEvent::Unshifted(info));
        id
    }

    /// Drop a task from whichever list holds it.
    ///
    /// Removing the current task only keeps it from running again; use
    /// [`Queue::signal`] to stop it.
    pub fn remove(&self, id: TaskId) -> bool {
        self.remove_with_error(id, None)
    }

    /// Like [`Queue::remove`], with `error` carried in the removal event.
    pub fn remove_with_error(&self, id: TaskId, error: Option<TaskError>) -> bool {
        let mut state = self.shared.state.lock();
        let mut evicted = Vec::new();
        let Some(task) = state.rotation.remove(id, &mut evicted) else {
            return false;
        };
        tracing::debug!("[Queue] Removed {} ({})", task.uid(), id);
        self.emit(QueueEvent::Removed {
            task: task.info(),
            error,
        });
        self.emit_removed(evicted);
        true
    }

    /// Forward a control to the current task; `false` when none accepts it.
    pub fn signal(&self, control: Control) -> bool {
        let (handle, current) = {
            let mut state = self.shared.state.lock();
            let current = state.current.as_ref().map(|c| c.id);
            (state.control.take(), current)
        };
        let Some(mut handle) = handle else {
            return false;
        };

        tracing::debug!("[Queue] Signal {:?} to task {:?}", control, current);
        handle(control);

        let mut state = self.shared.state.lock();
        if state.control.is_none() && state.current.as_ref().map(|c| c.id) == current {
            state.control = Some(handle);
        }
        true
    }

    /// Start the run loop; `false` if it is already running or there is
    /// nothing to run. Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.running || state.rotation.is_empty() {
                return false;
            }
            state.running = true;
        }
        tracing::info!("[Queue] Run loop started");
        tokio::spawn(self.clone().drive());
        true
    }

    async fn drive(self) {
        while let Some(task) = self.next_task() {
            let (done, result) = Completion::channel();
            let started = std::panic::catch_unwind(AssertUnwindSafe(|| task.job.invoke(done)));

            let outcome: TaskResult = match started {
                Ok(Ok(handle)) => {
                    if let Some(handle) = handle {
                        self.install_control(task.id, handle);
                    }
                    result.await.unwrap_or(Err(TaskError::Abandoned))
                }
                Ok(Err(err)) => Err(err),
                Err(panic) => Err(TaskError::Rejected(panic_message(&*panic))),
            };

            self.finish(task, outcome);
        }
    }

    fn next_task(&self) -> Option<TaskWrapper<M>> {
        let mut state = self.shared.state.lock();
        let mut removed = Vec::new();
        let shifted = state.rotation.shift(&mut removed);
        self.emit_removed(removed);

        let Some(Shifted { mut task, one_shot }) = shifted else {
            state.running = false;
            state.current = None;
            tracing::info!("[Queue] Nothing left to run, loop stopped");
            self.emit(QueueEvent::Idle);
            return None;
        };

        task.exec_count += 1;
        if let Some(stored) = state.rotation.get_mut(task.id) {
            stored.exec_count = task.exec_count;
        }
        let info = task.info();
        state.current = Some(info.clone());

        tracing::info!(
            "[Queue] Next: {} (run {}, {} queued)",
            info.uid(),
            info.exec_count,
            state.rotation.len()
        );
        if !one_shot {
            self.emit(QueueEvent::Repeat(info.clone()));
        }
        self.emit(QueueEvent::Next(info));
        Some(task)
    }

    fn install_control(&self, id: TaskId, handle: ControlHandle) {
        let mut state = self.shared.state.lock();
        if state.current.as_ref().map(|c| c.id) == Some(id) {
            state.control = Some(handle);
        }
    }

    fn finish(&self, task: TaskWrapper<M>, outcome: TaskResult) {
        let control = {
            let mut state = self.shared.state.lock();
            state.current = None;
            state.control.take()
        };
        drop(control);

        let info = task.info();
        match outcome {
            Ok(output) => {
                tracing::debug!("[Queue] {} finished", info.uid());
                self.emit(QueueEvent::Succeeded { task: info, output });
            }
            Err(error) => {
                tracing::warn!("[Queue] {} failed: {}", info.uid(), error);
                self.remove_with_error(task.id, Some(error.clone()));
                self.emit(QueueEvent::Failed { task: info, error });
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Task being executed right now
    pub fn current_task(&self) -> Option<TaskInfo<M>> {
        self.shared.state.lock().current.clone()
    }

    /// Logical length: fresh rotation tasks, overflow and one-shot tasks.
    pub fn len(&self) -> usize {
        self.shared.state.lock().rotation.len()
    }

    /// Nothing left to run
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().rotation.is_empty()
    }

    pub fn loop_size(&self) -> usize {
        self.shared.state.lock().rotation.max()
    }

    /// Every queued task in run order
    pub fn tasks(&self) -> Vec<TaskInfo<M>> {
        self.shared
            .state
            .lock()
            .rotation
            .iter()
            .map(TaskWrapper::info)
            .collect()
    }

    pub fn find(&self, uid: &str) -> Option<TaskInfo<M>> {
        let state = self.shared.state.lock();
        let found = state
            .rotation
            .iter()
            .find(|w| w.uid() == uid)
            .map(TaskWrapper::info);
        found
    }

    pub fn region_of(&self, id: TaskId) -> Option<Region> {
        self.shared.state.lock().rotation.region_of(id)
    }

    /// Serializable copy of every list.
    pub fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let codec = self.shared.codec.as_ref().ok_or(QueueError::NoCodec)?;
        let state = self.shared.state.lock();

        let encode = |w: &TaskWrapper<M>| -> Result<TaskRecord, QueueError> {
            Ok(TaskRecord {
                init_time: w.init_time,
                exec_count: w.exec_count,
                metadata: codec.encode(&w.metadata)?,
            })
        };

        Ok(QueueSnapshot {
            old: state.rotation.aged(),
            items: state.rotation.items().map(encode).collect::<Result<_, _>>()?,
            exceed_items: state.rotation.overflow().map(encode).collect::<Result<_, _>>()?,
            prepend_list: state.rotation.prepended().map(encode).collect::<Result<_, _>>()?,
        })
    }

    /// Replace every list with the snapshot's contents.
    ///
    /// Entries whose job cannot be rebuilt are skipped with a warning; the
    /// aged count is adjusted for skipped aged entries. The current run, if
    /// any, is unaffected. No events are emitted.
    pub fn restore(&self, snapshot: QueueSnapshot) -> Result<RestoreReport, QueueError> {
        let codec = self.shared.codec.as_ref().ok_or(QueueError::NoCodec)?;
        let mut state = self.shared.state.lock();
        let mut skipped = 0;

        let mut decode = |state: &mut State<M>, record: TaskRecord| -> Option<TaskWrapper<M>> {
            match codec.decode(record.metadata) {
                Ok((metadata, job)) => {
                    let id = state.next_id;
                    state.next_id += 1;
                    Some(TaskWrapper::restore(
                        id,
                        job,
                        metadata,
                        record.init_time,
                        record.exec_count,
                    ))
                }
                Err(err) => {
                    tracing::warn!("[Queue] Skipping stored task: {}", err);
                    skipped += 1;
                    None
                }
            }
        };

        let fresh_len = snapshot.items.len().saturating_sub(snapshot.old);
        let mut items = Vec::with_capacity(snapshot.items.len());
        let mut old = 0;
        for (i, record) in snapshot.items.into_iter().enumerate() {
            if let Some(task) = decode(&mut *state, record) {
                if i >= fresh_len {
                    old += 1;
                }
                items.push(task);
            }
        }
        let exceed: Vec<_> = snapshot
            .exceed_items
            .into_iter()
            .filter_map(|r| decode(&mut *state, r))
            .collect();
        let prepend: Vec<_> = snapshot
            .prepend_list
            .into_iter()
            .filter_map(|r| decode(&mut *state, r))
            .collect();

        let decoded = items.len() + exceed.len() + prepend.len();
        let max = state.rotation.max();
        state.rotation = Rotation::from_parts(max, items, old, exceed, prepend);
        let restored = state.rotation.iter().count();
        drop(decode);
        skipped += decoded - restored;

        tracing::info!(
            "[Queue] Restored {} tasks ({} skipped, {} aged)",
            restored,
            skipped,
            state.rotation.aged()
        );
        Ok(RestoreReport { restored, skipped })
    }
}
