//! A closable FIFO queue for producer/consumer coordination.
//!
//! `put` never suspends. `get` on an empty open queue parks the caller in the
//! queue's own waiting list. A `put` wakes the oldest waiter but does not hand
//! it the item: the waiter re-reads the head of the queue when it resumes, so
//! several `put`s landing before it runs still come out in order.
//!
//! Closing is one-way. Items already enqueued stay retrievable; once they are
//! drained every `get` fails with [`QueueClosed`]. Closing wakes a single
//! waiter, and only when the queue is empty at that moment.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::error::QueueClosed;
use crate::executor::Wakeup;
use crate::runtime::Handle;

struct Inner<T> {
    items: VecDeque<T>,
    waiting: VecDeque<(u64, Wakeup)>,
    next_waiter: u64,
    closed: bool,
}

impl<T> Inner<T> {
    fn register(&mut self, wakeup: Wakeup) -> u64 {
        let id = self.next_waiter;
        self.next_waiter += 1;
        self.waiting.push_back((id, wakeup));
        id
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.waiting.iter().position(|(waiter, _)| *waiter == id)
    }

    fn remove(&mut self, id: u64) -> bool {
        match self.position(id) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Shared handle to a queue. Clones refer to the same queue.
///
/// # Examples
///
/// ```ignore
/// let queue = AsyncQueue::new(&handle);
/// let consumer = queue.clone();
/// handle.add_task(async move {
///     while let Ok(item) = consumer.get().await {
///         println!("consumed {item}");
///     }
/// });
/// queue.put(1)?;
/// queue.close();
/// ```
pub struct AsyncQueue<T> {
    inner: Rc<RefCell<Inner<T>>>,
    handle: Handle,
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T: 'static> AsyncQueue<T> {
    pub fn new(handle: &Handle) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                items: VecDeque::new(),
                waiting: VecDeque::new(),
                next_waiter: 0,
                closed: false,
            })),
            handle: handle.clone(),
        }
    }

    /// Appends `item` and wakes the oldest waiter, if any.
    pub fn put(&self, item: T) -> Result<(), QueueClosed> {
        let woken = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(QueueClosed);
            }
            inner.items.push_back(item);
            inner.waiting.pop_front()
        };
        if let Some((_, wakeup)) = woken {
            self.handle.schedule(wakeup);
        }
        Ok(())
    }

    /// Takes the oldest item, suspending while the queue is empty and open.
    pub fn get(&self) -> Get<'_, T> {
        Get {
            queue: self,
            waiter: None,
        }
    }

    /// Callback flavour of [`get`](Self::get).
    ///
    /// With an item available or the queue closed and drained, `callback` runs
    /// immediately. Otherwise the request waits in line with task waiters and
    /// is retried from the ready queue when woken.
    ///
    /// A parked callback does not keep the queue alive. If every handle is gone
    /// by the time it runs, it receives [`QueueClosed`].
    pub fn get_with<F>(&self, callback: F)
    where
        F: FnOnce(Result<T, QueueClosed>) + 'static,
    {
        let result = {
            let mut inner = self.inner.borrow_mut();
            match inner.items.pop_front() {
                Some(item) => Ok(item),
                None if inner.closed => Err(QueueClosed),
                None => {
                    let queue = Rc::downgrade(&self.inner);
                    let handle = self.handle.clone();
                    inner.register(Wakeup::Callback(Box::new(move || {
                        retry_get(queue, handle, callback)
                    })));
                    return;
                }
            }
        };
        callback(result);
    }

    /// Closes the queue. Only the first call has an effect.
    pub fn close(&self) {
        let woken = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            if inner.items.is_empty() {
                inner.waiting.pop_front()
            } else {
                None
            }
        };
        if let Some((_, wakeup)) = woken {
            self.handle.schedule(wakeup);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Number of units parked on an empty queue.
    pub fn waiters(&self) -> usize {
        self.inner.borrow().waiting.len()
    }
}

fn retry_get<T, F>(queue: Weak<RefCell<Inner<T>>>, handle: Handle, callback: F)
where
    T: 'static,
    F: FnOnce(Result<T, QueueClosed>) + 'static,
{
    match queue.upgrade() {
        Some(inner) => AsyncQueue { inner, handle }.get_with(callback),
        None => callback(Err(QueueClosed)),
    }
}

impl<T> fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AsyncQueue")
            .field("items", &inner.items.len())
            .field("waiting", &inner.waiting.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Future returned by [`AsyncQueue::get`].
#[must_use = "futures do nothing unless awaited"]
pub struct Get<'a, T> {
    queue: &'a AsyncQueue<T>,
    /// Our place in the waiting list, once parked.
    waiter: Option<u64>,
}

impl<T: 'static> Future for Get<'_, T> {
    type Output = Result<T, QueueClosed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.queue.inner.borrow_mut();

        if let Some(item) = inner.items.pop_front() {
            if let Some(id) = this.waiter.take() {
                inner.remove(id);
            }
            return Poll::Ready(Ok(item));
        }
        if inner.closed {
            if let Some(id) = this.waiter.take() {
                inner.remove(id);
            }
            return Poll::Ready(Err(QueueClosed));
        }

        // Woken but beaten to the item: queue up again at the back.
        match this.waiter.and_then(|id| inner.position(id)) {
            Some(index) => inner.waiting[index].1 = Wakeup::Task(cx.waker().clone()),
            None => this.waiter = Some(inner.register(Wakeup::Task(cx.waker().clone()))),
        }
        Poll::Pending
    }
}

impl<T> Drop for Get<'_, T> {
    fn drop(&mut self) {
        let Some(id) = self.waiter.take() else {
            return;
        };
        let handoff = {
            let mut inner = self.queue.inner.borrow_mut();
            if inner.remove(id) {
                None
            } else if !inner.items.is_empty() || inner.closed {
                // We were woken for an item or the close; pass it on.
                inner.waiting.pop_front()
            } else {
                None
            }
        };
        if let Some((_, wakeup)) = handoff {
            self.queue.handle.schedule(wakeup);
        }
    }
}
