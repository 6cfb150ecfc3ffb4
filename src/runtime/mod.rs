//! Single-threaded mio runtime.
//!
//! - `EventLoop`: the poll every blocking point waits on, plus the shutdown waker
//! - `Listener`: the bound socket and its accept loop step
//! - `Connection`: one client's receive/append/echo cycle

mod connection;
mod event_loop;
mod listener;

pub use connection::{Close, Connection, ConnectionLimits};
pub use event_loop::EventLoop;
pub use listener::{Accept, Listener};
