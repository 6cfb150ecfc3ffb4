//! Detaching from the controlling terminal.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

/// A daemonization step failed.
#[derive(Debug, Error)]
#[error("Failed to daemonize ({step}): {source}")]
pub struct DaemonError {
    pub step: &'static str,
    #[source]
    pub source: io::Error,
}

impl DaemonError {
    fn last_os_error(step: &'static str) -> Self {
        Self {
            step,
            source: io::Error::last_os_error(),
        }
    }
}

/// Fork into the background, start a new session, move to `/`, and point
/// the standard streams at `/dev/null`.
///
/// Only the child returns. Must be called while the process is still
/// single-threaded.
pub fn daemonize() -> Result<(), DaemonError> {
    match unsafe { libc::fork() } {
        -1 => return Err(DaemonError::last_os_error("fork")),
        0 => {}
        // Parent: leave without running destructors, the child owns
        // every resource from here on.
        _ => unsafe { libc::_exit(0) },
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(DaemonError::last_os_error("setsid"));
    }

    std::env::set_current_dir("/").map_err(|source| DaemonError {
        step: "chdir",
        source,
    })?;

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|source| DaemonError {
            step: "open /dev/null",
            source,
        })?;

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } == -1 {
            return Err(DaemonError::last_os_error("redirect stdio"));
        }
    }

    Ok(())
}
