//! Append-only packet log backed by a single file.
//!
//! The file accumulates every complete packet received during one server
//! run. It is opened and closed on every operation so no handle outlives a
//! call, and it is removed when the server exits.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Default location of the packet log.
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";

/// Errors from log store operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open data file '{}': {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("short write to data file: {written} of {expected} bytes written")]
    ShortWrite {
        written: usize,
        expected: usize,
        #[source]
        source: Option<io::Error>,
    },

    #[error("failed to read data file: {0}")]
    Read(#[source] io::Error),

    /// The destination rejected the streamed content.
    #[error("failed to send data file content: {0}")]
    Sink(#[source] io::Error),
}

/// File-backed append-only log.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    chunk_size: usize,
}

impl LogStore {
    /// Create a store at `path`; reads are streamed in `chunk_size` pieces.
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `data` to the end of the log, creating the file if needed.
    pub fn append(&self, data: &[u8]) -> Result<(), LogError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LogError::Open {
                path: self.path.clone(),
                source,
            })?;

        let mut written = 0;
        while written < data.len() {
            match file.write(&data[written..]) {
                Ok(0) => {
                    return Err(LogError::ShortWrite {
                        written,
                        expected: data.len(),
                        source: None,
                    })
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(LogError::ShortWrite {
                        written,
                        expected: data.len(),
                        source: Some(e),
                    })
                }
            }
        }

        trace!(bytes = written, path = %self.path.display(), "Appended packet");
        Ok(())
    }

    /// Stream the full log content into `out`, returning the bytes copied.
    ///
    /// A log that does not exist yet is empty.
    pub fn copy_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<u64, LogError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(LogError::Open {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut chunk = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LogError::Read(e)),
            };
            out.write_all(&chunk[..n]).map_err(LogError::Sink)?;
            total += n as u64;
        }

        trace!(bytes = total, "Streamed data file");
        Ok(total)
    }

    /// Read the full log content into memory.
    #[cfg(test)]
    pub fn read_all(&self) -> Result<Vec<u8>, LogError> {
        let mut content = Vec::new();
        self.copy_to(&mut content)?;
        Ok(content)
    }

    /// Delete the log file. A missing file is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed data file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LogStore {
        LogStore::new(dir.path().join("data"), 4)
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.read_all().unwrap().is_empty());

        let mut sink = Vec::new();
        assert_eq!(store.copy_to(&mut sink).unwrap(), 0);
    }

    #[test]
    fn test_append_accumulates_in_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.append(b"hello\n").unwrap();
        assert_eq!(store.read_all().unwrap(), b"hello\n");

        store.append(b"world\n").unwrap();
        assert_eq!(store.read_all().unwrap(), b"hello\nworld\n");
    }

    #[test]
    fn test_copy_streams_in_chunks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let payload = b"a packet longer than one chunk\n";
        store.append(payload).unwrap();

        let mut sink = Vec::new();
        let copied = store.copy_to(&mut sink).unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(sink, payload);
    }

    #[test]
    fn test_sink_failure_is_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(b"x\n").unwrap();
        assert!(matches!(store.copy_to(&mut Broken), Err(LogError::Sink(_))));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(b"x\n").unwrap();
        assert!(store.path().exists());

        store.remove().unwrap();
        assert!(!store.path().exists());

        // Removing again is fine
        store.remove().unwrap();
    }

    #[test]
    fn test_open_failure() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path().join("missing").join("data"), 16);
        assert!(matches!(store.append(b"x\n"), Err(LogError::Open { .. })));
    }
}
