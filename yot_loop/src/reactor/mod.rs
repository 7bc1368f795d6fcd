//! Event-driven I/O readiness.
//!
//! The reactor owns the readiness poll and the I/O wait table: for every
//! registered resource, at most one unit waiting to read and one waiting to write.

pub(crate) mod reactor;
pub(crate) use reactor::{Direction, Reactor};
