//! Delay queue: units waiting for a deadline.
//!
//! A min-heap ordered by `(deadline, sequence)`. The sequence number is taken
//! from a counter shared by every entry of the queue, so entries with equal
//! deadlines fire in insertion order even when timestamps collide.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::executor::Wakeup;

#[derive(Debug)]
struct DelayEntry {
    deadline: Instant,
    sequence: u64,
    wakeup: Wakeup,
    token: CancelToken,
}

impl Ord for DelayEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for DelayEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for DelayEntry {}

#[derive(Debug, Default)]
pub(crate) struct DelayQueue {
    heap: BinaryHeap<DelayEntry>,
    next_sequence: u64,
}

impl DelayQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parks `wakeup` until `deadline`. The returned token cancels the entry.
    pub(crate) fn push(&mut self, deadline: Instant, wakeup: Wakeup) -> CancelToken {
        let token = CancelToken::new();
        self.next_sequence += 1;
        self.heap.push(DelayEntry {
            deadline,
            sequence: self.next_sequence,
            wakeup,
            token: token.clone(),
        });
        token
    }

    /// Drops cancelled entries so they neither keep the loop alive nor shorten
    /// the poll timeout.
    pub(crate) fn purge_cancelled(&mut self) {
        self.heap.retain(|entry| !entry.token.is_cancelled());
    }

    /// Earliest live deadline.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if entry.token.is_cancelled() {
                self.heap.pop();
                continue;
            }
            return Some(entry.deadline);
        }
        None
    }

    /// Removes every entry due at `now`, in `(deadline, sequence)` order.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<Wakeup> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            let Some(entry) = self.heap.pop() else { break };
            if entry.token.is_cancelled() {
                continue;
            }
            entry.token.mark_fired();
            due.push(entry.wakeup);
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn take_all(&mut self) -> Vec<Wakeup> {
        self.heap.drain().map(|entry| entry.wakeup).collect()
    }
}
