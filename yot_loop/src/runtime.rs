//! The event loop and the handle units use to reach it.
//!
//! An [`EventLoop`] owns a ready queue, a delay queue and an I/O wait table.
//! Nothing is stored in globals or thread-locals: every operation goes through
//! a [`Handle`], so independent loops never share state. [`EventLoop::run`] is
//! the only code that ever resumes a unit.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use mio::{Registry, Token};
use tracing::{debug, error, warn};

use crate::cancel::{CancelToken, TimerHandle, WaitHandle};
use crate::config::LoopConfig;
use crate::error::{Fault, FaultSource};
use crate::executor::{Inbox, ReadyQueue, Unit, WAKE_TOKEN, Wakeup};
use crate::io::{IoWait, Watched};
use crate::reactor::{Direction, Reactor};
use crate::task::{Step, Task, TaskId, TaskState};
use crate::time::Sleep;
use crate::timer::DelayQueue;

/// Counters accumulated over the lifetime of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub tasks_spawned: u64,
    pub units_run: u64,
    pub timers_fired: u64,
    pub io_wakeups: u64,
    pub faults: u64,
    /// Readiness polls issued, blocking or not.
    pub polls: u64,
}

/// Far enough out to never fire in practice while staying representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, clamped for delays too large to represent as an `Instant`.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

pub(crate) struct Core {
    ready: RefCell<ReadyQueue>,
    delayed: RefCell<DelayQueue>,
    reactor: RefCell<Reactor>,
    registry: Registry,
    inbox: Arc<Inbox>,
    tasks: RefCell<HashMap<TaskId, Rc<Task>>>,
    next_task: Cell<u64>,
    next_token: Cell<usize>,
    faults: RefCell<Vec<Fault>>,
    stats: Cell<LoopStats>,
    running: Cell<bool>,
}

impl Core {
    fn new(config: &LoopConfig) -> io::Result<Self> {
        let (reactor, registry) = Reactor::new(config.events_capacity)?;
        let inbox = Arc::new(Inbox::new(&registry)?);
        Ok(Self {
            ready: RefCell::new(ReadyQueue::default()),
            delayed: RefCell::new(DelayQueue::new()),
            reactor: RefCell::new(reactor),
            registry,
            inbox,
            tasks: RefCell::new(HashMap::new()),
            next_task: Cell::new(0),
            next_token: Cell::new(0),
            faults: RefCell::new(Vec::new()),
            stats: Cell::new(LoopStats::default()),
            running: Cell::new(false),
        })
    }

    fn bump(&self, f: impl FnOnce(&mut LoopStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Appends to the ready queue. Wakes recorded so far are moved first so the
    /// queue reflects the order in which units became runnable.
    fn push_ready(&self, unit: Unit) {
        self.drain_inbox();
        self.ready.borrow_mut().push(unit);
    }

    /// Moves woken tasks from the inbox onto the ready queue.
    fn drain_inbox(&self) {
        while let Some(id) = self.inbox.pop() {
            let task = self.tasks.borrow().get(&id).cloned();
            if let Some(task) = task {
                if task.on_wake() {
                    self.ready.borrow_mut().push(Unit::Task(id));
                }
            }
        }
    }

    /// Returns a parked unit to the ready queue.
    fn schedule(&self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Callback(f) => self.push_ready(Unit::Callback(f)),
            Wakeup::Task(waker) => {
                waker.wake();
                self.drain_inbox();
            }
        }
    }

    fn spawn(&self, future: crate::task::TaskFuture) -> TaskId {
        let id = TaskId(self.next_task.get());
        self.next_task.set(id.0 + 1);

        self.drain_inbox();
        let task = Rc::new(Task::new(id, future, self.inbox.clone()));
        self.tasks.borrow_mut().insert(id, task);
        self.ready.borrow_mut().push(Unit::Task(id));

        self.bump(|s| s.tasks_spawned += 1);
        counter!("yot_loop_tasks_spawned_total").increment(1);
        gauge!("yot_loop_tasks_pending_current").increment(1.0);
        debug!(task = %id, "task spawned");
        id
    }

    /// Runs one unit. Each invocation is a fault-isolation boundary: a panic is
    /// recorded and the loop carries on.
    fn invoke(&self, unit: Unit) {
        self.bump(|s| s.units_run += 1);
        counter!("yot_loop_units_run_total").increment(1);

        match unit {
            Unit::Callback(f) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                self.drain_inbox();
                if let Err(payload) = outcome {
                    self.record_fault(Fault::from_panic(FaultSource::Callback, payload));
                }
            }
            Unit::Task(id) => {
                let Some(task) = self.tasks.borrow().get(&id).cloned() else {
                    return;
                };
                if task.state() != TaskState::Scheduled {
                    return;
                }
                match task.resume() {
                    Step::Pending => {
                        self.drain_inbox();
                        if task.settle() {
                            self.ready.borrow_mut().push(Unit::Task(id));
                        }
                    }
                    Step::Completed => {
                        self.drain_inbox();
                        self.finish(task.id());
                        debug!(task = %id, "task completed");
                    }
                    Step::Faulted(payload) => {
                        self.drain_inbox();
                        self.finish(task.id());
                        self.record_fault(Fault::from_panic(FaultSource::Task(id), payload));
                    }
                }
            }
        }
    }

    fn finish(&self, id: TaskId) {
        let removed = self.tasks.borrow_mut().remove(&id);
        if removed.is_some() {
            gauge!("yot_loop_tasks_pending_current").decrement(1.0);
        }
    }

    fn record_fault(&self, fault: Fault) {
        error!(unit = %fault.unit, message = %fault.message, "unit panicked; loop continues");
        self.bump(|s| s.faults += 1);
        counter!("yot_loop_faults_total").increment(1);
        self.faults.borrow_mut().push(fault);
    }

    /// `true` once ready queue, delay queue and I/O wait table are all empty.
    fn is_quiescent(&self) -> bool {
        self.delayed.borrow_mut().purge_cancelled();
        self.ready.borrow().is_empty()
            && self.delayed.borrow().is_empty()
            && self.reactor.borrow_mut().is_idle()
            && self.inbox.is_empty()
    }

    /// Blocks on readiness, bounded by the nearest deadline, then moves every
    /// ready I/O waiter and every due timer onto the ready queue.
    fn wait_for_work(&self) {
        let timeout = self
            .delayed
            .borrow_mut()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        let blocking = timeout != Some(Duration::ZERO);
        if blocking && !self.inbox.park() {
            return;
        }
        self.bump(|s| s.polls += 1);
        counter!("yot_loop_polls_total").increment(1);
        let polled = self.reactor.borrow_mut().poll(timeout);
        if blocking {
            self.inbox.unpark();
        }

        let ready = match polled {
            Ok(ready) => ready,
            Err(e) => panic!("yot_loop: readiness poll failed: {e}"),
        };
        for wakeup in ready {
            self.bump(|s| s.io_wakeups += 1);
            counter!("yot_loop_io_wakeups_total").increment(1);
            self.schedule(wakeup);
        }

        let due = self.delayed.borrow_mut().pop_due(Instant::now());
        for wakeup in due {
            self.bump(|s| s.timers_fired += 1);
            counter!("yot_loop_timers_fired_total").increment(1);
            self.schedule(wakeup);
        }
    }

    /// Empties every structure, dropping parked units outside of any borrow.
    /// Drop glue of a routine may touch the loop again, hence the repeat.
    fn teardown(&self) {
        loop {
            let tasks: Vec<Rc<Task>> = self.tasks.borrow_mut().drain().map(|(_, t)| t).collect();
            let futures: Vec<_> = tasks.iter().filter_map(|t| t.abandon()).collect();
            let ready = self.ready.borrow_mut().take_all();
            let delayed = self.delayed.borrow_mut().take_all();
            let waiting = self.reactor.borrow_mut().take_all();
            while self.inbox.pop().is_some() {}

            if tasks.is_empty() && ready.is_empty() && delayed.is_empty() && waiting.is_empty() {
                break;
            }
            drop((futures, tasks, ready, delayed, waiting));
        }
    }
}

/// A cheap, clonable reference to an [`EventLoop`].
///
/// Tasks and callbacks capture a handle to enqueue more work and to reach the
/// suspension primitives. A handle is bound to the loop that created it and
/// cannot leave its thread.
#[derive(Clone)]
pub struct Handle {
    core: Rc<Core>,
}

impl Handle {
    /// Submits a suspendable routine. It runs once the loop reaches it in
    /// the ready queue.
    pub fn add_task<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.core.spawn(Box::pin(future))
    }

    /// Appends a callback to the ready queue.
    pub fn call_soon<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.core.push_ready(Unit::Callback(Box::new(f)));
    }

    /// Runs a callback once `delay` has elapsed.
    ///
    /// The callback goes through the delay queue even for a zero delay, so it
    /// runs after everything already in the ready queue.
    /// Delays too large to represent are clamped to a deadline decades away.
    pub fn call_later<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        let token = self.park_timer(deadline_after(delay), Wakeup::Callback(Box::new(f)));
        TimerHandle::new(token)
    }

    /// Suspends the calling task for `delay`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// handle.add_task({
    ///     let handle = handle.clone();
    ///     async move {
    ///         handle.sleep(Duration::from_millis(100)).await;
    ///         println!("100ms later");
    ///     }
    /// });
    /// ```
    pub fn sleep(&self, delay: Duration) -> Sleep {
        Sleep::new(self.clone(), deadline_after(delay))
    }

    /// Suspends the calling task until `source` is readable.
    ///
    /// Only readiness is guaranteed; the read itself may still fail or report
    /// `WouldBlock`.
    pub fn read_wait<'a, S: Watched + ?Sized>(&self, source: &'a S) -> IoWait<'a, S> {
        IoWait::new(self.clone(), source, Direction::Read)
    }

    /// Suspends the calling task until `source` is writable.
    pub fn write_wait<'a, S: Watched + ?Sized>(&self, source: &'a S) -> IoWait<'a, S> {
        IoWait::new(self.clone(), source, Direction::Write)
    }

    /// Runs `f` once `source` is readable.
    pub fn on_readable<S, F>(&self, source: &S, f: F) -> io::Result<WaitHandle>
    where
        S: Watched + ?Sized,
        F: FnOnce() + 'static,
    {
        let token = self.park_io(source, Direction::Read, Wakeup::Callback(Box::new(f)))?;
        Ok(WaitHandle::new(token))
    }

    /// Runs `f` once `source` is writable.
    pub fn on_writable<S, F>(&self, source: &S, f: F) -> io::Result<WaitHandle>
    where
        S: Watched + ?Sized,
        F: FnOnce() + 'static,
    {
        let token = self.park_io(source, Direction::Write, Wakeup::Callback(Box::new(f)))?;
        Ok(WaitHandle::new(token))
    }

    pub(crate) fn park_timer(&self, deadline: Instant, wakeup: Wakeup) -> CancelToken {
        self.core.delayed.borrow_mut().push(deadline, wakeup)
    }

    /// Arms `source` for `direction` and records the waiter in the I/O wait table.
    pub(crate) fn park_io<S: Watched + ?Sized>(
        &self,
        source: &S,
        direction: Direction,
        wakeup: Wakeup,
    ) -> io::Result<CancelToken> {
        let token = source.token();
        let interest = self.core.reactor.borrow().interest_for(token, direction);
        if let Err(e) = source.rearm(&self.core.registry, interest) {
            warn!(?token, error = %e, "failed to arm resource for readiness");
            return Err(e);
        }
        self.core.reactor.borrow_mut().insert(token, direction, wakeup)
    }

    /// Releases every waiter of a resource being dropped.
    pub(crate) fn forget_io(&self, token: Token) {
        let dropped = match self.core.reactor.try_borrow_mut() {
            Ok(mut reactor) => reactor.forget(token),
            Err(_) => return,
        };
        drop(dropped);
    }

    pub(crate) fn schedule(&self, wakeup: Wakeup) {
        self.core.schedule(wakeup);
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.core.registry
    }

    pub(crate) fn next_token(&self) -> Token {
        let next = self.core.next_token.get();
        debug_assert!(Token(next) != WAKE_TOKEN);
        self.core.next_token.set(next + 1);
        Token(next)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("tasks", &self.core.tasks.borrow().len())
            .field("ready", &self.core.ready.borrow().len())
            .field("delayed", &self.core.delayed.borrow().len())
            .field("io_waiting", &self.core.reactor.borrow().len())
            .finish()
    }
}

/// A single-threaded cooperative scheduler.
///
/// Tasks (futures) and callbacks are multiplexed over the calling thread. A
/// unit runs uninterrupted until it completes or reaches a suspension point:
/// [`Handle::sleep`], [`Handle::read_wait`], [`Handle::write_wait`],
/// [`AsyncQueue::get`](crate::queue::AsyncQueue::get) on an empty queue, or
/// [`yield_now`](crate::time::yield_now).
pub struct EventLoop {
    handle: Handle,
}

impl EventLoop {
    /// Creates a loop with the default configuration.
    ///
    /// Use [`Builder`](crate::config::Builder) to configure it or to enable
    /// the metrics exporter.
    pub fn new() -> io::Result<Self> {
        Self::with_config(&LoopConfig::default())
    }

    pub(crate) fn with_config(config: &LoopConfig) -> io::Result<Self> {
        let core = Rc::new(Core::new(config)?);
        Ok(Self {
            handle: Handle { core },
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// See [`Handle::add_task`].
    pub fn add_task<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.handle.add_task(future)
    }

    /// See [`Handle::call_soon`].
    pub fn call_soon<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.handle.call_soon(f)
    }

    /// See [`Handle::call_later`].
    pub fn call_later<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.handle.call_later(delay, f)
    }

    /// Drives the loop until the ready queue, the delay queue and the I/O wait
    /// table are all empty.
    ///
    /// Each pass runs every ready unit in FIFO order; once nothing is ready it
    /// blocks on I/O readiness, bounded by the nearest timer deadline, and then
    /// requeues ready I/O waiters followed by due timers. With only I/O waiters
    /// left it blocks indefinitely.
    ///
    /// Tasks parked elsewhere (for instance on an [`AsyncQueue`](crate::queue::AsyncQueue)
    /// nobody will feed) do not keep the loop alive; they stay suspended and a
    /// later `run` may resume them.
    ///
    /// # Panics
    ///
    /// Panics if the operating system's readiness poll fails with anything
    /// other than an interruption.
    pub fn run(&self) {
        let core = &self.handle.core;
        if core.running.replace(true) {
            warn!("EventLoop::run called while the loop is already running");
            return;
        }
        debug!("event loop started");

        loop {
            core.drain_inbox();
            loop {
                let next = core.ready.borrow_mut().pop();
                match next {
                    Some(unit) => core.invoke(unit),
                    None => break,
                }
            }

            if core.is_quiescent() {
                break;
            }
            core.wait_for_work();
        }

        core.running.set(false);
        debug!(
            suspended = core.tasks.borrow().len(),
            "event loop reached quiescence"
        );
    }

    /// Submits `future` as a task, runs the loop to quiescence and returns the
    /// future's output. `None` if it never completed or panicked.
    pub fn block_on<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let out = slot.clone();
        self.add_task(async move {
            let value = future.await;
            *out.borrow_mut() = Some(value);
        });
        self.run();
        slot.borrow_mut().take()
    }

    /// Faults isolated since the last call, oldest first.
    pub fn take_faults(&self) -> Vec<Fault> {
        std::mem::take(&mut *self.handle.core.faults.borrow_mut())
    }

    pub fn stats(&self) -> LoopStats {
        self.handle.core.stats.get()
    }

    /// Number of spawned tasks that have not completed yet.
    pub fn suspended_tasks(&self) -> usize {
        self.handle.core.tasks.borrow().len()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Parked units hold handles back to the core; break the cycle.
        self.handle.core.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_order_is_preserved_across_direct_pushes() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();
        let log = Rc::new(RefCell::new(Vec::new()));
        let slot = Rc::new(RefCell::new(None::<std::task::Waker>));

        {
            let log = log.clone();
            let slot = slot.clone();
            let registered = Cell::new(false);
            event_loop.add_task(async move {
                futures::future::poll_fn(|cx| {
                    if registered.get() {
                        return std::task::Poll::Ready(());
                    }
                    registered.set(true);
                    *slot.borrow_mut() = Some(cx.waker().clone());
                    std::task::Poll::Pending
                })
                .await;
                log.borrow_mut().push("task");
            });
        }
        {
            let log = log.clone();
            event_loop.call_soon(move || {
                let waker = slot.borrow_mut().take().unwrap();
                // Woken before the push, so the task runs first.
                waker.wake();
                handle.call_soon(move || log.borrow_mut().push("callback"));
            });
        }
        event_loop.run();
        assert_eq!(*log.borrow(), vec!["task", "callback"]);
    }

    #[test]
    fn duplicate_ready_entry_does_not_overpoll() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();
        let polls = Rc::new(Cell::new(0));
        {
            let polls = polls.clone();
            event_loop.add_task(async move {
                polls.set(polls.get() + 1);
                crate::yield_now().await;
                polls.set(polls.get() + 1);
            });
        }
        // A second ready entry for the same task must be a no-op.
        handle.core.ready.borrow_mut().push(Unit::Task(TaskId(0)));
        event_loop.run();
        assert_eq!(polls.get(), 2);
        assert_eq!(event_loop.suspended_tasks(), 0);
    }
}
