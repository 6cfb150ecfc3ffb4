//! Cooperative shutdown driven by SIGINT and SIGTERM.
//!
//! Signals are received on a dedicated thread, which only raises the
//! shutdown flag and wakes the event loop. Every blocking wait in the
//! server observes the flag and unwinds.

use crate::error::ServerError;
use mio::Waker;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Shared shutdown request.
///
/// Cloning yields another handle to the same flag.
#[derive(Clone, Debug)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        }
    }

    /// Request shutdown and wake the event loop.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Install handlers for SIGINT and SIGTERM that trigger `shutdown`.
///
/// Must run after daemonizing, since the listening thread does not survive
/// a fork.
pub fn install_signal_handlers(shutdown: Shutdown) -> Result<JoinHandle<()>, ServerError> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(ServerError::Signal)?;

    thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                info!(signal, "Caught signal, exiting");
                shutdown.trigger();
            }
        })
        .map_err(ServerError::Signal)
}
