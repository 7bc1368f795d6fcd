//! Timer-driven suspension and the bare suspend point.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::executor::Wakeup;
use crate::runtime::Handle;

/// Future returned by [`Handle::sleep`].
///
/// The first poll parks the task in the delay queue; the task is resumed once
/// the deadline has passed. Dropping a pending `Sleep` cancels its entry.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct Sleep {
    handle: Handle,
    deadline: Instant,
    entry: Option<CancelToken>,
}

impl Sleep {
    pub(crate) fn new(handle: Handle, deadline: Instant) -> Self {
        Self {
            handle,
            deadline,
            entry: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match &this.entry {
            Some(entry) if entry.has_fired() => Poll::Ready(()),
            // Resumed by something other than our timer; keep waiting.
            Some(_) => Poll::Pending,
            None => {
                let entry = this
                    .handle
                    .park_timer(this.deadline, Wakeup::Task(cx.waker().clone()));
                this.entry = Some(entry);
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(entry) = &self.entry {
            entry.cancel();
        }
    }
}

/// Yields control back to the loop exactly once.
///
/// The task registers itself nowhere, so it goes straight to the back of the
/// ready queue and resumes after every unit already waiting there.
///
/// # Examples
///
/// ```ignore
/// async fn cooperative() {
///     yield_now().await;
///     println!("other units had a chance to run");
/// }
/// ```
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
