//! A single-threaded cooperative event loop.
//!
//! The loop multiplexes callbacks and suspendable tasks over one thread. A
//! unit runs until it completes or suspends; nothing preempts it. It consists of:
//!
//! - [`runtime`]: the [`EventLoop`] and the [`Handle`] units use to reach it
//! - [`time`]: timer suspension and the bare suspend point
//! - [`io`]: readiness waits on registered resources
//! - [`net`]: non-blocking TCP built on readiness waits
//! - [`queue`]: a closable FIFO for producer/consumer coordination
//! - [`config`]: configured construction and the optional metrics exporter
//!
//! ```ignore
//! #[yot_loop::main]
//! async fn main(handle: yot_loop::Handle) {
//!     handle.sleep(std::time::Duration::from_millis(100)).await;
//!     println!("done");
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub(crate) mod executor;
pub mod io;
pub mod net;
pub mod queue;
pub(crate) mod reactor;
pub mod runtime;
pub mod task;
pub mod time;
pub(crate) mod timer;
pub(crate) mod waker;

pub use cancel::{TimerHandle, WaitHandle};
pub use config::{Builder, LoopConfig};
pub use error::{BuildError, ConfigError, Fault, FaultSource, QueueClosed};
pub use io::{IoWait, Watched};
pub use net::{TcpListener, TcpStream};
pub use queue::{AsyncQueue, Get};
pub use runtime::{EventLoop, Handle, LoopStats};
pub use task::TaskId;
pub use time::{Sleep, YieldNow, yield_now};

pub use yot_loop_macros::main;
