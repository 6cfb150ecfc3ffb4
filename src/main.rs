//! packetlog: a TCP packet logging server
//!
//! Clients send newline-delimited packets. Every complete packet is
//! appended to a log file, and the whole file is sent back to the client
//! that completed it.
//!
//! Features:
//! - One connection served at a time over a mio event loop
//! - Graceful shutdown on SIGINT/SIGTERM; the log file is removed on exit
//! - Optional daemon mode (`-d`)
//! - Optional TOML configuration through `PACKETLOG_CONFIG`
//!
//! Logs go to stderr unless `logging.file` is set. In daemon mode stderr
//! is redirected to `/dev/null`, so set `logging.file` to keep the log.

mod config;
mod daemon;
mod error;
mod packet;
mod runtime;
mod server;
mod shutdown;
mod storage;

use config::Config;
use error::ServerError;
use server::Server;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config)?;

    if let Err(e) = run(config) {
        error!(error = %e, "Fatal error");
        return Err(e.into());
    }
    Ok(())
}

fn init_logging(config: &Config) -> Result<(), ServerError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match &config.log_file {
        // A file keeps the log reachable once daemon mode detaches stderr.
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(ServerError::Logging)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

fn run(config: Config) -> Result<(), ServerError> {
    info!(
        listen = %config.listen,
        data_file = %config.data_file.display(),
        chunk_size = config.chunk_size,
        max_packet_size = config.max_packet_size,
        daemon = config.daemon,
        "Starting packetlog server"
    );

    // Bind before detaching so setup errors still reach the terminal.
    let server = Server::bind(&config)?;

    if config.daemon {
        if config.discards_daemon_logs() {
            warn!("No logging.file configured; log output is discarded once detached");
        }
        info!("Running in daemon mode");
        daemon::daemonize()?;
    }

    shutdown::install_signal_handlers(server.shutdown_handle())?;
    server.run()
}
