//! The task adapter: drives a suspendable routine one step at a time.
//!
//! A routine is any `'static` future; it does not need to be `Send` because it
//! never leaves the loop thread. Each [`Task::resume`] is one poll, advancing
//! the routine to its next suspend point or to completion.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::future::LocalBoxFuture;

use crate::executor::Inbox;
use crate::waker::task_waker;

/// A pinned, heap-allocated routine that produces no output.
pub type TaskFuture = LocalBoxFuture<'static, ()>;

/// Identifies a task within the loop that spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a task currently lives.
///
/// `Scheduled` means "in the ready queue", which is how the loop guarantees a
/// task sits there at most once. `Notified` is a wake that arrived while the
/// task was running; the task is re-appended once its step ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Idle,
    Scheduled,
    Running,
    Notified,
    Completed,
}

/// Result of a single resume.
pub(crate) enum Step {
    Pending,
    Completed,
    Faulted(Box<dyn Any + Send>),
}

pub(crate) struct Task {
    id: TaskId,
    state: Cell<TaskState>,
    /// Taken out while polling so the routine can never observe itself.
    future: RefCell<Option<TaskFuture>>,
    waker: Waker,
}

impl Task {
    pub(crate) fn new(id: TaskId, future: TaskFuture, inbox: Arc<Inbox>) -> Self {
        Self {
            id,
            state: Cell::new(TaskState::Scheduled),
            future: RefCell::new(Some(future)),
            waker: task_waker(id, inbox),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Applies a wake drained from the inbox. Returns `true` when the caller
    /// must append the task to the ready queue.
    pub(crate) fn on_wake(&self) -> bool {
        match self.state.get() {
            TaskState::Idle => {
                self.state.set(TaskState::Scheduled);
                true
            }
            TaskState::Running => {
                self.state.set(TaskState::Notified);
                false
            }
            TaskState::Scheduled | TaskState::Notified | TaskState::Completed => false,
        }
    }

    /// Advances the routine to its next suspend point.
    ///
    /// A panic inside the routine is caught here and reported as
    /// [`Step::Faulted`]; the task is completed either way.
    pub(crate) fn resume(&self) -> Step {
        let Some(mut future) = self.future.borrow_mut().take() else {
            self.state.set(TaskState::Completed);
            return Step::Completed;
        };
        self.state.set(TaskState::Running);

        let mut cx = Context::from_waker(&self.waker);
        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                *self.future.borrow_mut() = Some(future);
                Step::Pending
            }
            Ok(Poll::Ready(())) => {
                self.state.set(TaskState::Completed);
                Step::Completed
            }
            Err(payload) => {
                self.state.set(TaskState::Completed);
                Step::Faulted(payload)
            }
        }
    }

    /// Finishes a pending step, after the wakes it produced were drained.
    /// Returns `true` when the task woke itself and must go back on the ready queue.
    pub(crate) fn settle(&self) -> bool {
        match self.state.get() {
            TaskState::Notified => {
                self.state.set(TaskState::Scheduled);
                true
            }
            TaskState::Running => {
                self.state.set(TaskState::Idle);
                false
            }
            _ => false,
        }
    }

    /// Drops the routine without running it further.
    pub(crate) fn abandon(&self) -> Option<TaskFuture> {
        self.state.set(TaskState::Completed);
        self.future.borrow_mut().take()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
