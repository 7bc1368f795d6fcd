//! Units of work and the FIFO ready queue that holds them.
//!
//! The loop drives exactly two shapes of unit: a bare callback, run once, and a
//! spawned task, resumed through its [`Task`](crate::task::Task) adapter. Units
//! parked elsewhere (delay queue, I/O wait table, async queue waiting list) are
//! held as a [`Wakeup`] until something moves them back here.

mod inbox;

pub(crate) use inbox::{Inbox, WAKE_TOKEN};

use std::collections::VecDeque;
use std::fmt;
use std::task::Waker;

use crate::task::TaskId;

pub(crate) type Callback = Box<dyn FnOnce() + 'static>;

/// An immediately runnable unit.
pub(crate) enum Unit {
    Callback(Callback),
    Task(TaskId),
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Callback(_) => f.write_str("Unit::Callback"),
            Unit::Task(id) => write!(f, "Unit::Task({id})"),
        }
    }
}

/// How a parked unit gets back onto the ready queue.
///
/// Tasks are resumed through their waker, which keeps the ready queue free of
/// duplicates; callbacks are appended as they are.
pub(crate) enum Wakeup {
    Callback(Callback),
    Task(Waker),
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wakeup::Callback(_) => f.write_str("Wakeup::Callback"),
            Wakeup::Task(_) => f.write_str("Wakeup::Task"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    units: VecDeque<Unit>,
}

impl ReadyQueue {
    pub(crate) fn push(&mut self, unit: Unit) {
        self.units.push_back(unit);
    }

    pub(crate) fn pop(&mut self) -> Option<Unit> {
        self.units.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub(crate) fn take_all(&mut self) -> VecDeque<Unit> {
        std::mem::take(&mut self.units)
    }
}
