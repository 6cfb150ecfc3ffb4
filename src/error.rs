//! Fatal setup errors.
//!
//! Anything here aborts the process with a non-zero exit status. Errors
//! scoped to a single connection live with the connection handler.

use crate::config::ConfigError;
use crate::daemon::DaemonError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Failed to bind socket to {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("Failed to listen on socket: {0}")]
    Listen(#[source] io::Error),

    #[error("Event loop failure: {0}")]
    Poll(#[source] io::Error),

    #[error("Failed to set up signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("Failed to initialise logging: {0}")]
    Logging(#[source] io::Error),
}
