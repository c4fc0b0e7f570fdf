//! Rotating content queue
//!
//! Keeps a bounded rotation of recurring tasks (songs), a FIFO of tasks
//! waiting for rotation space, and a list of one-shot tasks (announcements)
//! that run before the rotation continues. One task runs at a time.

pub mod events;
pub mod persist;
pub mod rotation;
pub mod scheduler;
pub mod task;

pub use events::QueueEvent;
pub use persist::{QueueSnapshot, RestoreReport, SerdeCodec, TaskCodec, TaskRecord};
pub use rotation::{Region, Rotation};
pub use scheduler::Queue;
pub use task::{
    Completion, Control, ControlHandle, ControlReceiver, Job, TaskId, TaskInfo, TaskMetadata,
    TaskOutput, TaskResult, TaskWrapper,
};
