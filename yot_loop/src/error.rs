//! Error types surfaced by the event loop and its queues.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::task::TaskId;

/// Returned by [`AsyncQueue`](crate::queue::AsyncQueue) operations once the queue is closed.
///
/// For `put` this is immediate. For `get` it is only reported after every item
/// enqueued before the close has been drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is closed")]
pub struct QueueClosed;

/// An environment override that could not be applied to a [`LoopConfig`](crate::config::LoopConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("events capacity must be greater than zero")]
    ZeroEventsCapacity,
}

/// Failure while constructing an [`EventLoop`](crate::runtime::EventLoop).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to set up readiness polling: {0}")]
    Io(#[from] io::Error),
    #[error("failed to install metrics exporter: {0}")]
    Metrics(String),
}

/// Which unit panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSource {
    Task(TaskId),
    Callback,
}

impl fmt::Display for FaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSource::Task(id) => write!(f, "task {id}"),
            FaultSource::Callback => f.write_str("callback"),
        }
    }
}

/// A panic caught at a unit invocation boundary.
///
/// The loop keeps running after a fault; callers collect these with
/// [`EventLoop::take_faults`](crate::runtime::EventLoop::take_faults).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{unit} panicked: {message}")]
pub struct Fault {
    pub unit: FaultSource,
    pub message: String,
}

impl Fault {
    pub(crate) fn from_panic(unit: FaultSource, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { unit, message }
    }
}
