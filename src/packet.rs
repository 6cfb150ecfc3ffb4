//! Packet framing.
//!
//! Clients send arbitrary bytes; a packet ends at each newline. Bytes are
//! accumulated across receives until a delimiter arrives, and every
//! completed packet is handed back with its delimiter still attached.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Byte that terminates a packet.
pub const DELIMITER: u8 = b'\n';

/// Default upper bound for a single packet (64 MiB).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Failure to grow the in-progress packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("packet of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Accumulates raw chunks into newline-terminated packets.
///
/// The buffer only ever holds the bytes of the packet currently in
/// progress; it is empty between packets.
#[derive(Debug)]
pub struct PacketAssembler {
    buf: BytesMut,
    max_packet_size: usize,
}

impl PacketAssembler {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_packet_size,
        }
    }

    /// Append `chunk` and return every packet it completed, in order.
    ///
    /// On error the in-progress packet is discarded and the assembler is
    /// left empty.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, AssembleError> {
        // The first segment extends the current packet; later ones start fresh.
        let mut size = self.buf.len();
        for segment in chunk.split_inclusive(|&b| b == DELIMITER) {
            size += segment.len();
            if size > self.max_packet_size {
                self.buf.clear();
                return Err(AssembleError::TooLarge {
                    size,
                    limit: self.max_packet_size,
                });
            }
            if segment.last() == Some(&DELIMITER) {
                size = 0;
            }
        }

        // Everything already buffered is known to be delimiter-free.
        let mut scan_from = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut packets = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf[scan_from..]) {
            let end = scan_from + pos + 1;
            packets.push(self.buf.split_to(end).freeze());
            scan_from = 0;
        }
        Ok(packets)
    }

    /// Number of bytes buffered for the packet in progress.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop the packet in progress.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == DELIMITER)
}
