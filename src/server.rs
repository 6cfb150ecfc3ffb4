//! TCP server for the packet log.
//!
//! Accepts one connection at a time, serves it to completion, and removes
//! the log file when the accept loop ends.

use crate::config::Config;
use crate::error::ServerError;
use crate::runtime::{Accept, Close, Connection, ConnectionLimits, EventLoop, Listener};
use crate::shutdown::Shutdown;
use crate::storage::LogStore;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    events: EventLoop,
    listener: Listener,
    store: LogStore,
    limits: ConnectionLimits,
}

impl Server {
    /// Bind the listening socket and prepare the event loop.
    ///
    /// Nothing is accepted until [`Server::run`].
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let events = EventLoop::new().map_err(ServerError::Poll)?;
        let mut listener = Listener::bind(config.listen, config.backlog)?;
        listener
            .register(events.registry())
            .map_err(ServerError::Poll)?;

        info!(
            address = %config.listen,
            backlog = config.backlog,
            data_file = %config.data_file.display(),
            "Server listening"
        );

        Ok(Server {
            events,
            listener,
            store: LogStore::new(&config.data_file, config.chunk_size),
            limits: ConnectionLimits {
                chunk_size: config.chunk_size,
                max_packet_size: config.max_packet_size,
            },
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops the server from another thread or a signal handler.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.events.shutdown().clone()
    }

    /// Run the accept loop until shutdown, then remove the log file.
    pub fn run(mut self) -> Result<(), ServerError> {
        let result = self.accept_loop();

        if let Err(e) = self.store.remove() {
            error!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to remove data file"
            );
        }
        info!("Exiting");
        result
    }

    fn accept_loop(&mut self) -> Result<(), ServerError> {
        loop {
            match self
                .listener
                .accept_next(&mut self.events)
                .map_err(ServerError::Poll)?
            {
                Accept::Connection(stream, peer) => self.handle(stream, peer),
                Accept::Shutdown => {
                    debug!("Accept loop stopping");
                    return Ok(());
                }
                Accept::Transient(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle(&mut self, stream: mio::net::TcpStream, peer: SocketAddr) {
        info!(peer = %peer.ip(), "Accepted connection");

        let mut conn = Connection::new(stream, peer, self.limits);
        match conn.serve(&mut self.events, &self.store) {
            Ok(Close::PeerClosed) => {}
            Ok(Close::Shutdown) => debug!(peer = %peer, "Connection interrupted by shutdown"),
            Err(e) => warn!(peer = %peer, error = %e, "Connection error"),
        }

        info!(peer = %conn.peer().ip(), packets = conn.packets(), "Closed connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read, Write};
    use std::net::TcpStream;
    use std::path::PathBuf;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestServer {
        addr: SocketAddr,
        shutdown: Shutdown,
        data_file: PathBuf,
        handle: JoinHandle<Result<(), ServerError>>,
    }

    impl TestServer {
        fn start(dir: &TempDir) -> Self {
            Self::start_with(dir, |_| {})
        }

        fn start_with(dir: &TempDir, configure: impl FnOnce(&mut Config)) -> Self {
            let mut config = Config {
                listen: "127.0.0.1:0".parse().unwrap(),
                data_file: dir.path().join("packets"),
                ..Config::default()
            };
            configure(&mut config);
            let data_file = config.data_file.clone();

            let server = Server::bind(&config).unwrap();
            let addr = server.local_addr().unwrap();
            let shutdown = server.shutdown_handle();
            let handle = thread::spawn(move || server.run());

            TestServer {
                addr,
                shutdown,
                data_file,
                handle,
            }
        }

        fn connect(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            stream
        }

        /// Stop the server and report whether the data file survived.
        fn stop(self) -> bool {
            self.shutdown.trigger();
            self.handle.join().unwrap().unwrap();
            self.data_file.exists()
        }
    }

    fn send_packet(stream: &mut TcpStream, packet: &[u8], expected: &[u8]) {
        stream.write_all(packet).unwrap();
        let mut reply = vec![0u8; expected.len()];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(reply, expected);
    }

    #[test]
    fn test_echo_accumulates_within_connection() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(&dir);
        let mut client = server.connect();

        send_packet(&mut client, b"hello\n", b"hello\n");
        send_packet(&mut client, b"world\n", b"hello\nworld\n");

        drop(client);
        assert!(!server.stop());
    }

    #[test]
    fn test_multiple_packets_in_one_write() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(&dir);
        let mut client = server.connect();

        client.write_all(b"a\nb\n").unwrap();
        let mut reply = vec![0u8; b"a\na\nb\n".len()];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, b"a\na\nb\n");

        drop(client);
        server.stop();
    }

    #[test]
    fn test_second_connection_sees_first_packet() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(&dir);

        let mut first = server.connect();
        send_packet(&mut first, b"first\n", b"first\n");
        drop(first);

        let mut second = server.connect();
        send_packet(&mut second, b"second\n", b"first\nsecond\n");
        drop(second);

        server.stop();
    }

    #[test]
    fn test_partial_packet_gets_no_reply() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(&dir);
        let mut client = server.connect();

        client.write_all(b"no newline yet").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 64];
        let err = client.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
        assert!(!server.data_file.exists());

        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        send_packet(&mut client, b"\n", b"no newline yet\n");

        drop(client);
        server.stop();
    }

    #[test]
    fn test_shutdown_while_idle() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(&dir);
        thread::sleep(Duration::from_millis(50));
        assert!(!server.stop());
    }

    #[test]
    fn test_shutdown_with_open_connection() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(&dir);
        let mut client = server.connect();
        send_packet(&mut client, b"pending\n", b"pending\n");
        assert!(server.data_file.exists());

        // The client stays connected; shutdown must still complete.
        assert!(!server.stop());
        drop(client);
    }

    #[test]
    fn test_restart_starts_empty() {
        let dir = TempDir::new().unwrap();

        let server = TestServer::start(&dir);
        let mut client = server.connect();
        send_packet(&mut client, b"old\n", b"old\n");
        drop(client);
        assert!(!server.stop());

        let server = TestServer::start(&dir);
        let mut client = server.connect();
        send_packet(&mut client, b"new\n", b"new\n");
        drop(client);
        assert!(!server.stop());
    }

    /// Asserts nothing arrives within a short window and the peer is still
    /// connected.
    fn expect_silence(stream: &mut TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 64];
        let err = stream.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
    }

    #[test]
    fn test_large_echo_survives_full_send_buffer() {
        let dir = TempDir::new().unwrap();
        let history: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("packets"), &history).unwrap();

        let server = TestServer::start(&dir);
        let mut client = server.connect();
        client.write_all(b"x\n").unwrap();

        // Let the server fill the socket buffer before anything is read.
        thread::sleep(Duration::from_millis(300));

        let mut expected = history;
        expected.extend_from_slice(b"x\n");
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).unwrap();
        assert!(reply == expected, "echo differs from data file");

        drop(client);
        assert!(!server.stop());
    }

    #[test]
    fn test_keeps_accepting_after_oversized_packet() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start_with(&dir, |config| {
            config.chunk_size = 16;
            config.max_packet_size = 32;
        });

        let mut first = server.connect();
        // The server may reset the connection while this is being written.
        let _ = first.write_all(&[b'x'; 100]);
        let mut rest = Vec::new();
        match first.read_to_end(&mut rest) {
            Ok(_) => {}
            Err(e) => assert!(!matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )),
        }
        assert!(rest.is_empty());
        assert!(!server.data_file.exists());

        let mut second = server.connect();
        send_packet(&mut second, b"ok\n", b"ok\n");
        drop(second);

        assert!(!server.stop());
    }

    #[test]
    fn test_append_failure_keeps_connection_open() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start_with(&dir, |config| {
            config.data_file = dir.path().join("missing").join("packets");
        });

        let mut client = server.connect();
        client.write_all(b"a\n").unwrap();
        // Nothing could be stored, so the echo is empty.
        expect_silence(&mut client);

        client.write_all(b"b\n").unwrap();
        expect_silence(&mut client);
        drop(client);

        // The server is still serving after the failed appends.
        let mut next = server.connect();
        next.write_all(b"c\n").unwrap();
        expect_silence(&mut next);
        drop(next);

        assert!(!server.stop());
    }
}
