//! Cancellation tokens for parked units.
//!
//! Every delay-queue and I/O-wait entry carries a token. Cancelling only flips a
//! flag; the loop skips the entry when it would otherwise resume it, so the
//! heap and the wait table are never restructured mid-flight.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Flags {
    cancelled: Cell<bool>,
    fired: Cell<bool>,
}

/// Shared state between a parked entry and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelToken {
    flags: Rc<Flags>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the entry already fired; cancelling it then has no effect.
    pub(crate) fn cancel(&self) -> bool {
        if self.flags.fired.get() {
            return false;
        }
        self.flags.cancelled.set(true);
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flags.cancelled.get()
    }

    pub(crate) fn mark_fired(&self) {
        self.flags.fired.set(true);
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.flags.fired.get()
    }

    /// Live means still waiting: neither fired nor cancelled.
    pub(crate) fn is_live(&self) -> bool {
        !self.is_cancelled() && !self.has_fired()
    }
}

/// Handle to a callback scheduled with [`Handle::call_later`](crate::runtime::Handle::call_later).
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancelToken,
}

impl TimerHandle {
    pub(crate) fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// Prevents the callback from running. Returns `false` if it already ran.
    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn has_fired(&self) -> bool {
        self.token.has_fired()
    }
}

/// Handle to a callback waiting on I/O readiness, see
/// [`Handle::on_readable`](crate::runtime::Handle::on_readable).
#[derive(Debug, Clone)]
pub struct WaitHandle {
    token: CancelToken,
}

impl WaitHandle {
    pub(crate) fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// Releases the wait slot without running the callback. Returns `false`
    /// if the resource already became ready.
    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn has_fired(&self) -> bool {
        self.token.has_fired()
    }
}
