//! Landing zone for task wake-ups.
//!
//! Wakers must be `Send + Sync`, but the ready queue lives on the loop thread.
//! A waker therefore only records its task id here; the loop moves ids onto the
//! ready queue between unit invocations. If the loop is blocked in the
//! readiness poll, a wake from another thread interrupts it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;
use mio::{Registry, Token};
use tracing::warn;

use crate::task::TaskId;

/// Reserved for the poll waker; never handed out to an I/O resource.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

#[derive(Debug)]
pub(crate) struct Inbox {
    woken: SegQueue<TaskId>,
    /// Set while the loop is blocked in the readiness poll.
    parked: AtomicBool,
    waker: mio::Waker,
}

impl Inbox {
    pub(crate) fn new(registry: &Registry) -> io::Result<Self> {
        Ok(Self {
            woken: SegQueue::new(),
            parked: AtomicBool::new(false),
            waker: mio::Waker::new(registry, WAKE_TOKEN)?,
        })
    }

    pub(crate) fn push(&self, task: TaskId) {
        self.woken.push(task);
        if self.parked.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.waker.wake() {
                warn!(error = %e, "failed to interrupt readiness poll");
            }
        }
    }

    pub(crate) fn pop(&self) -> Option<TaskId> {
        self.woken.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.woken.is_empty()
    }

    /// Marks the loop as about to block. Returns `false` when a wake slipped in
    /// and the loop must not block after all.
    pub(crate) fn park(&self) -> bool {
        self.parked.store(true, Ordering::Release);
        // Recheck to avoid a lost wakeup.
        if !self.woken.is_empty() {
            self.parked.store(false, Ordering::Release);
            return false;
        }
        true
    }

    pub(crate) fn unpark(&self) {
        self.parked.store(false, Ordering::Release);
    }
}
