//! mio event loop shared by the listener and the connection handler.
//!
//! Readiness-based model: sockets are non-blocking, and whenever an
//! operation would block the caller parks here until the poll reports its
//! token or a shutdown is requested.

use crate::shutdown::Shutdown;
use mio::{Events, Poll, Registry, Token, Waker};
use std::io;
use tracing::trace;

pub(crate) const LISTENER_TOKEN: Token = Token(0);
pub(crate) const CONNECTION_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 16;

/// Outcome of waiting on the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The awaited token reported an event.
    Ready,
    /// Shutdown was requested while waiting.
    Shutdown,
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    shutdown: Shutdown,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            shutdown: Shutdown::new(waker),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Block until `token` is ready or shutdown is requested.
    ///
    /// Events for other tokens are dropped; callers always retry their
    /// operation before waiting again, so no readiness is lost.
    pub fn wait(&mut self, token: Token) -> io::Result<Readiness> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(Readiness::Shutdown);
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            if self.shutdown.is_requested() {
                return Ok(Readiness::Shutdown);
            }
            if self.events.iter().any(|event| event.token() == token) {
                return Ok(Readiness::Ready);
            }
            trace!(?token, "Ignoring unrelated wakeup");
        }
    }
}
