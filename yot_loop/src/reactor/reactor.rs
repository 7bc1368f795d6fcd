use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tracing::trace;

use crate::cancel::CancelToken;
use crate::executor::{WAKE_TOKEN, Wakeup};

/// Which readiness a unit is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

impl Direction {
    fn interest(self) -> Interest {
        match self {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        }
    }
}

#[derive(Debug)]
struct Waiter {
    wakeup: Wakeup,
    token: CancelToken,
}

impl Waiter {
    fn is_live(&self) -> bool {
        self.token.is_live()
    }
}

#[derive(Debug, Default)]
struct Waiters {
    read: Option<Waiter>,
    write: Option<Waiter>,
}

impl Waiters {
    fn slot(&mut self, direction: Direction) -> &mut Option<Waiter> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn has_live(&self) -> bool {
        self.read.as_ref().is_some_and(Waiter::is_live)
            || self.write.as_ref().is_some_and(Waiter::is_live)
    }
}

/// Manages I/O readiness for units parked on a resource.
///
/// The poll uses system-level event notification (epoll, kqueue) so the loop
/// blocks without spinning while every unit is waiting. Resources are
/// identified by the [`Token`] they were registered under.
pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    waiting: HashMap<Token, Waiters>,
}

impl Reactor {
    /// Creates a reactor and a registry handle for registering resources
    /// without borrowing the reactor itself.
    pub(crate) fn new(events_capacity: usize) -> io::Result<(Self, Registry)> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let reactor = Self {
            poll,
            events: Events::with_capacity(events_capacity),
            waiting: HashMap::new(),
        };

        Ok((reactor, registry))
    }

    /// Interest a resource must be armed with so that both the new waiter and
    /// any live waiter in the other direction get their readiness reported.
    pub(crate) fn interest_for(&self, token: Token, direction: Direction) -> Interest {
        let other = match direction {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        };
        let other_live = self.waiting.get(&token).is_some_and(|w| match other {
            Direction::Read => w.read.as_ref().is_some_and(Waiter::is_live),
            Direction::Write => w.write.as_ref().is_some_and(Waiter::is_live),
        });
        if other_live {
            direction.interest() | other.interest()
        } else {
            direction.interest()
        }
    }

    /// Parks `wakeup` until the resource behind `token` is ready in `direction`.
    ///
    /// A second live waiter for the same resource and direction is rejected.
    pub(crate) fn insert(
        &mut self,
        token: Token,
        direction: Direction,
        wakeup: Wakeup,
    ) -> io::Result<CancelToken> {
        let slot = self.waiting.entry(token).or_default().slot(direction);
        if slot.as_ref().is_some_and(Waiter::is_live) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("a unit is already waiting on {token:?} for {direction:?}"),
            ));
        }
        let cancel = CancelToken::new();
        *slot = Some(Waiter {
            wakeup,
            token: cancel.clone(),
        });
        Ok(cancel)
    }

    /// Drops every waiter on a resource that is going away.
    pub(crate) fn forget(&mut self, token: Token) -> Vec<Wakeup> {
        self.waiting
            .remove(&token)
            .into_iter()
            .flat_map(|w| [w.read, w.write])
            .flatten()
            .map(|w| w.wakeup)
            .collect()
    }

    /// `true` when no live waiter remains. Cancelled waiters are purged.
    pub(crate) fn is_idle(&mut self) -> bool {
        self.waiting.retain(|_, w| w.has_live());
        self.waiting.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.values().filter(|w| w.has_live()).count()
    }

    /// Blocks until a registered resource is ready or `timeout` elapses, and
    /// removes the waiters of every ready resource from the table.
    ///
    /// `None` blocks indefinitely.
    pub(crate) fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Wakeup>> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(e);
        }
        trace!(events = self.events.iter().count(), ?timeout, "readiness poll returned");

        let mut ready = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            let Some(waiters) = self.waiting.get_mut(&token) else {
                continue;
            };

            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed() || event.is_error();
            if readable {
                take_live(&mut waiters.read, &mut ready);
            }
            if writable {
                take_live(&mut waiters.write, &mut ready);
            }
            if waiters.read.is_none() && waiters.write.is_none() {
                self.waiting.remove(&token);
            }
        }
        Ok(ready)
    }

    pub(crate) fn take_all(&mut self) -> Vec<Wakeup> {
        self.waiting
            .drain()
            .flat_map(|(_, w)| [w.read, w.write])
            .flatten()
            .map(|w| w.wakeup)
            .collect()
    }
}

fn take_live(slot: &mut Option<Waiter>, ready: &mut Vec<Wakeup>) {
    if let Some(waiter) = slot.take() {
        if waiter.token.is_cancelled() {
            return;
        }
        waiter.token.mark_fired();
        ready.push(waiter.wakeup);
    }
}
