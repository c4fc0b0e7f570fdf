//! Jobs, completions and task wrappers
//!
//! A [`Job`] is a reusable factory: every time the queue runs it, the job
//! receives a fresh single-use [`Completion`] and may hand back a
//! [`ControlHandle`] through which the queue forwards [`Control`] signals
//! while it is the current task.

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::error::{QueueError, TaskError};

/// Queue-assigned identity of a wrapper, unique for the queue's lifetime
pub type TaskId = u64;

/// Value a job completes with
pub type TaskOutput = Value;

pub type TaskResult = Result<TaskOutput, TaskError>;

/// Signals forwarded to the running job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Finish early and resolve the completion
    Stop,
    /// Application-defined signal
    Custom(String),
}

/// Receives [`Control`] signals for the duration of one run
pub type ControlHandle = Box<dyn FnMut(Control) + Send>;

/// Channel end handed to async jobs built with [`Job::from_async`]
pub type ControlReceiver = mpsc::UnboundedReceiver<Control>;

type Resolver = Box<dyn FnOnce(TaskResult) + Send>;

/// Single-use completion of one run.
///
/// Clones share the same slot: only the first [`Completion::resolve`]
/// takes effect.
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<Resolver>>>,
}

impl Completion {
    /// Completion that invokes `on_resolve` with the result.
    pub fn new(on_resolve: impl FnOnce(TaskResult) + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(on_resolve)))),
        }
    }

    /// Completion whose result arrives on a oneshot receiver.
    ///
    /// If every clone is dropped unresolved the receiver sees a closed channel.
    pub fn channel() -> (Self, oneshot::Receiver<TaskResult>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    /// Deliver the result. A second call is a contract violation: it is
    /// logged and rejected, and the first result stands.
    pub fn resolve(&self, result: TaskResult) -> Result<(), QueueError> {
        let resolver = self.slot.lock().take();
        match resolver {
            Some(resolver) => {
                resolver(result);
                Ok(())
            }
            None => {
                tracing::error!("[Queue] Completion resolved more than once, result discarded");
                Err(QueueError::AlreadyCompleted)
            }
        }
    }

    pub fn succeed(&self, output: TaskOutput) -> Result<(), QueueError> {
        self.resolve(Ok(output))
    }

    pub fn fail(&self, err: TaskError) -> Result<(), QueueError> {
        self.resolve(Err(err))
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

type JobFn = dyn Fn(Completion) -> Result<Option<ControlHandle>, TaskError> + Send + Sync;

/// Reusable unit of work.
///
/// Invoking a job starts one run. Returning `Err` is a synchronous
/// rejection: the run never started and the completion is ignored.
#[derive(Clone)]
pub struct Job(Arc<JobFn>);

impl Job {
    pub fn new<F>(start: F) -> Self
    where
        F: Fn(Completion) -> Result<Option<ControlHandle>, TaskError> + Send + Sync + 'static,
    {
        Self(Arc::new(start))
    }

    /// Job whose run is a spawned future.
    ///
    /// Controls are delivered on the receiver. A panic inside the future
    /// fails the run instead of abandoning it. Must be started from within
    /// a tokio runtime.
    pub fn from_async<F, Fut>(run: F) -> Self
    where
        F: Fn(ControlReceiver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(move |done| {
            let (tx, rx) = mpsc::unbounded_channel();
            let future = run(rx);
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(TaskError::Failed(panic_message(&*panic))),
                };
                let _ = done.resolve(result);
            });
            Ok(Some(Box::new(move |control| {
                let _ = tx.send(control);
            })))
        })
    }

    /// Job that completes synchronously with `output` on every run.
    pub fn ready(output: TaskOutput) -> Self {
        Self::new(move |done| {
            let _ = done.succeed(output.clone());
            Ok(None)
        })
    }

    /// Run `first`, then `second`, completing with both outputs as a
    /// two-element array.
    ///
    /// A failure of either fails the composite without running the rest.
    /// [`Control::Stop`] is forwarded to whichever sub-job is active; a stop
    /// received before `first` finishes completes the composite with the
    /// first output alone.
    pub fn merge(first: Job, second: Job) -> Job {
        Job::new(move |done| {
            let active = Arc::new(Mutex::new(MergeState::default()));

            let first_done = {
                let active = active.clone();
                let second = second.clone();
                Completion::new(move |result| {
                    let first_output = match result {
                        Ok(output) => output,
                        Err(err) => {
                            let _ = done.fail(err);
                            return;
                        }
                    };

                    let stopped = {
                        let mut state = active.lock();
                        state.stage = Stage::Second;
                        state.handle = None;
                        state.stopped
                    };
                    if stopped {
                        let _ = done.succeed(first_output);
                        return;
                    }

                    let outer = done.clone();
                    let second_done = Completion::new(move |result| {
                        let _ = outer.resolve(
                            result.map(|second_output| Value::Array(vec![first_output, second_output])),
                        );
                    });
                    match second.invoke(second_done) {
                        Ok(handle) => {
                            let mut state = active.lock();
                            if state.handle.is_none() {
                                state.handle = handle;
                            }
                        }
                        Err(err) => {
                            let _ = done.fail(err);
                        }
                    }
                })
            };

            let handle = first.invoke(first_done)?;
            {
                let mut state = active.lock();
                if state.stage == Stage::First {
                    state.handle = handle;
                }
            }

            Ok(Some(Box::new(move |control: Control| {
                let (handle, stage) = {
                    let mut state = active.lock();
                    if control == Control::Stop {
                        state.stopped = true;
                    }
                    (state.handle.take(), state.stage)
                };
                let Some(mut handle) = handle else {
                    return;
                };
                handle(control);
                let mut state = active.lock();
                if state.stage == stage && state.handle.is_none() {
                    state.handle = Some(handle);
                }
            })))
        })
    }

    /// Start one run.
    pub(crate) fn invoke(&self, done: Completion) -> Result<Option<ControlHandle>, TaskError> {
        (self.0)(done)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Job")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    First,
    Second,
}

#[derive(Default)]
struct MergeState {
    stage: Stage,
    stopped: bool,
    handle: Option<ControlHandle>,
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

/// Application metadata carried by a task
pub trait TaskMetadata: Clone + Send + Sync + 'static {
    /// Deduplication key: at most one task per uid lives in a queue.
    fn uid(&self) -> &str;
}

/// A job plus its bookkeeping
#[derive(Debug, Clone)]
pub struct TaskWrapper<M> {
    pub(crate) id: TaskId,
    pub(crate) job: Job,
    pub(crate) metadata: M,
    /// Creation time, milliseconds since the Unix epoch
    pub(crate) init_time: i64,
    pub(crate) exec_count: u32,
}

impl<M: TaskMetadata> TaskWrapper<M> {
    pub fn new(id: TaskId, job: Job, metadata: M) -> Self {
        Self::restore(id, job, metadata, chrono::Utc::now().timestamp_millis(), 0)
    }

    /// Rebuild with stored bookkeeping.
    pub fn restore(id: TaskId, job: Job, metadata: M, init_time: i64, exec_count: u32) -> Self {
        Self {
            id,
            job,
            metadata,
            init_time,
            exec_count,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid()
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn init_time(&self) -> i64 {
        self.init_time
    }

    pub fn exec_count(&self) -> u32 {
        self.exec_count
    }

    pub fn info(&self) -> TaskInfo<M> {
        TaskInfo {
            id: self.id,
            metadata: self.metadata.clone(),
            init_time: self.init_time,
            exec_count: self.exec_count,
        }
    }
}

/// Read-only view of a task, used in events and listings
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo<M> {
    pub id: TaskId,
    pub metadata: M,
    pub init_time: i64,
    pub exec_count: u32,
}

impl<M: TaskMetadata> TaskInfo<M> {
    pub fn uid(&self) -> &str {
        self.metadata.uid()
    }
}
