//! Per-connection packet handling.
//!
//! A connection is read in fixed-size chunks. Every packet the assembler
//! completes is appended to the log store, and the full store content is
//! then streamed back to the client before the next chunk is read.

use crate::packet::{AssembleError, PacketAssembler};
use crate::runtime::event_loop::{EventLoop, Readiness, CONNECTION_TOKEN};
use crate::storage::{LogError, LogStore};
use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, error, trace};

/// Why a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Close {
    PeerClosed,
    Shutdown,
}

/// Errors that end one connection but not the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("receive failed: {0}")]
    Recv(#[source] io::Error),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("event loop failed: {0}")]
    Poll(#[source] io::Error),
    #[error(transparent)]
    Packet(#[from] AssembleError),
}

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub chunk_size: usize,
    pub max_packet_size: usize,
}

/// State for one accepted client.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    assembler: PacketAssembler,
    scratch: Vec<u8>,
    packets: u64,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, limits: ConnectionLimits) -> Self {
        Self {
            stream,
            peer,
            assembler: PacketAssembler::new(limits.max_packet_size),
            scratch: vec![0u8; limits.chunk_size],
            packets: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Number of packets appended and echoed so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Serve the connection until the peer closes, an error occurs, or
    /// shutdown is requested. The stream is deregistered on every path and
    /// closed when the connection is dropped.
    pub fn serve(
        &mut self,
        events: &mut EventLoop,
        store: &LogStore,
    ) -> Result<Close, ConnectionError> {
        events
            .registry()
            .register(
                &mut self.stream,
                CONNECTION_TOKEN,
                Interest::READABLE | Interest::WRITABLE,
            )
            .map_err(ConnectionError::Poll)?;

        let result = self.receive_loop(events, store);

        if let Err(e) = events.registry().deregister(&mut self.stream) {
            debug!(peer = %self.peer, error = %e, "Failed to deregister connection");
        }
        if !self.assembler.is_empty() {
            debug!(
                peer = %self.peer,
                bytes = self.assembler.pending(),
                "Discarding incomplete packet"
            );
            self.assembler.reset();
        }
        result
    }

    fn receive_loop(
        &mut self,
        events: &mut EventLoop,
        store: &LogStore,
    ) -> Result<Close, ConnectionError> {
        loop {
            if events.shutdown().is_requested() {
                return Ok(Close::Shutdown);
            }

            let n = match self.stream.read(&mut self.scratch) {
                Ok(0) => return Ok(Close::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    match events.wait(CONNECTION_TOKEN).map_err(ConnectionError::Poll)? {
                        Readiness::Ready => continue,
                        Readiness::Shutdown => return Ok(Close::Shutdown),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionError::Recv(e)),
            };

            trace!(peer = %self.peer, bytes = n, "Received chunk");
            let packets = self.assembler.push(&self.scratch[..n])?;

            for packet in packets {
                if let Err(e) = store.append(&packet) {
                    error!(peer = %self.peer, error = %e, "Failed to write packet to data file");
                }
                self.packets += 1;

                let mut out = Outbound {
                    stream: &mut self.stream,
                    events: &mut *events,
                    poll_error: None,
                };
                let copied = store.copy_to(&mut out);
                let poll_error = out.poll_error.take();

                match copied {
                    Ok(bytes) => trace!(peer = %self.peer, bytes, "Echoed data file"),
                    Err(LogError::Sink(e)) => {
                        return echo_failure(e, poll_error, events.shutdown().is_requested());
                    }
                    Err(e) => {
                        error!(peer = %self.peer, error = %e, "Failed to read data file");
                    }
                }
            }
        }
    }
}

/// Decide how a failed echo ends the connection.
fn echo_failure(
    send_error: io::Error,
    poll_error: Option<io::Error>,
    shutdown: bool,
) -> Result<Close, ConnectionError> {
    match poll_error {
        Some(e) => Err(ConnectionError::Poll(e)),
        None if shutdown => Ok(Close::Shutdown),
        None => Err(ConnectionError::Send(send_error)),
    }
}

/// Blocking-style writer over a non-blocking stream.
///
/// Parks on the event loop whenever the socket buffer is full. A failure
/// of the poll itself is kept in `poll_error` so it is not mistaken for a
/// send failure.
struct Outbound<'a> {
    stream: &'a mut TcpStream,
    events: &'a mut EventLoop,
    poll_error: Option<io::Error>,
}

impl Write for Outbound<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.stream.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    match self.events.wait(CONNECTION_TOKEN) {
                        Ok(Readiness::Ready) => {}
                        Ok(Readiness::Shutdown) => {
                            return Err(io::Error::new(
                                io::ErrorKind::ConnectionAborted,
                                "shutdown requested",
                            ));
                        }
                        Err(e) => {
                            let kind = e.kind();
                            self.poll_error = Some(e);
                            return Err(io::Error::new(kind, "event loop failed"));
                        }
                    }
                }
                result => return result,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
