//! Waiting for I/O readiness.
//!
//! A resource joins the poll set through [`Watched`]. Waiting arms the resource
//! for the requested direction and parks the caller in the I/O wait table; the
//! caller performs its own non-blocking operation once resumed.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use mio::{Interest, Registry, Token};

use crate::cancel::CancelToken;
use crate::executor::Wakeup;
use crate::reactor::Direction;
use crate::runtime::Handle;

/// A resource that can be watched for readiness.
///
/// Implementors register themselves with the loop's registry under a token
/// obtained from the loop when they are created, and deregister when dropped.
pub trait Watched {
    fn token(&self) -> Token;

    /// Re-arms the resource so the next poll reports `interest` if it is
    /// already, or becomes, ready.
    fn rearm(&self, registry: &Registry, interest: Interest) -> io::Result<()>;
}

/// Future returned by [`Handle::read_wait`] and [`Handle::write_wait`].
///
/// Resolves once the resource is ready in the requested direction. Arming or
/// slot conflicts (another unit already waiting in the same direction) are
/// reported as the future's output.
#[must_use = "futures do nothing unless awaited"]
pub struct IoWait<'a, S: ?Sized> {
    handle: Handle,
    source: &'a S,
    direction: Direction,
    entry: Option<CancelToken>,
}

impl<'a, S: ?Sized> IoWait<'a, S> {
    pub(crate) fn new(handle: Handle, source: &'a S, direction: Direction) -> Self {
        Self {
            handle,
            source,
            direction,
            entry: None,
        }
    }
}

impl<S: Watched + ?Sized> Future for IoWait<'_, S> {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &this.entry {
            Some(entry) if entry.has_fired() => Poll::Ready(Ok(())),
            Some(_) => Poll::Pending,
            None => {
                let parked = this.handle.park_io(
                    this.source,
                    this.direction,
                    Wakeup::Task(cx.waker().clone()),
                );
                match parked {
                    Ok(entry) => {
                        this.entry = Some(entry);
                        Poll::Pending
                    }
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
        }
    }
}

impl<S: ?Sized> Drop for IoWait<'_, S> {
    fn drop(&mut self) {
        if let Some(entry) = &self.entry {
            entry.cancel();
        }
    }
}
