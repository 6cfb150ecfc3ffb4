//! Listening socket.

use crate::error::ServerError;
use crate::runtime::event_loop::{EventLoop, Readiness, LISTENER_TOKEN};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry};
use std::io;
use std::net::SocketAddr;

/// Result of one accept attempt.
#[derive(Debug)]
pub enum Accept {
    Connection(TcpStream, SocketAddr),
    /// Shutdown was requested; the accept loop should stop.
    Shutdown,
    /// Accept failed for a reason unrelated to shutdown.
    Transient(io::Error),
}

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind to `addr` with address reuse enabled and start listening.
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self, ServerError> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .map_err(ServerError::Socket)?;

        socket
            .set_reuse_address(true)
            .map_err(ServerError::Socket)?;
        socket
            .bind(&addr.into())
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket.listen(backlog).map_err(ServerError::Listen)?;
        socket.set_nonblocking(true).map_err(ServerError::Socket)?;

        let listener: std::net::TcpListener = socket.into();
        Ok(Self {
            inner: TcpListener::from_std(listener),
        })
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.inner, LISTENER_TOKEN, Interest::READABLE)
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Wait for the next connection.
    ///
    /// Returns `Err` only when the event loop itself fails.
    pub fn accept_next(&self, events: &mut EventLoop) -> io::Result<Accept> {
        loop {
            if events.shutdown().is_requested() {
                return Ok(Accept::Shutdown);
            }

            match self.inner.accept() {
                Ok((stream, peer)) => return Ok(Accept::Connection(stream, peer)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if events.wait(LISTENER_TOKEN)? == Readiness::Shutdown {
                        return Ok(Accept::Shutdown);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Ok(Accept::Transient(e)),
            }
        }
    }
}
