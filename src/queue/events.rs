//! Queue notifications

use serde_json::Value;

use crate::error::TaskError;
use crate::queue::task::TaskInfo;

/// Everything observable about the queue, in the order it happened.
///
/// Delivered over a broadcast channel; slow subscribers may miss events
/// and see `RecvError::Lagged`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent<M> {
    /// Added to the rotation or its overflow
    Pushed(TaskInfo<M>),
    /// Added to the one-shot prepend list
    Unshifted(TaskInfo<M>),
    /// Dropped from the queue: explicit removal, uid replacement, eviction
    /// or failure (with the error)
    Removed {
        task: TaskInfo<M>,
        error: Option<TaskError>,
    },
    /// A rotation task went back to the tail for another cycle
    Repeat(TaskInfo<M>),
    /// A task became current and is about to start
    Next(TaskInfo<M>),
    Succeeded {
        task: TaskInfo<M>,
        output: Value,
    },
    Failed {
        task: TaskInfo<M>,
        error: TaskError,
    },
    /// The run loop found nothing to run and stopped
    Idle,
}
