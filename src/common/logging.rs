//! Logging and tracing configuration
//!
//! Logs never go to stdout: in remote mode stdout is captured and streamed
//! to the connected client.

use std::fs::File;
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for an interactive session (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is WARN, the prompt owns the terminal.
pub fn init_local() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a remote session (file + stderr logging)
///
/// The remote session logs to both:
/// 1. A log file at `<data dir>/dbg-frontend/logs/remote.log`
/// 2. stderr
///
/// Returns the log file path when file logging could be set up.
pub fn init_remote() -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dbg_frontend=debug,info"));

    let log_file = paths::log_dir().and_then(|log_dir| {
        std::fs::create_dir_all(&log_dir).ok()?;
        let path = log_dir.join("remote.log");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => Some((path, file)),
            Err(e) => {
                eprintln!("Warning: Could not open log file: {}", e);
                None
            }
        }
    });

    let (path, file) = log_file.unzip();
    remote_subscriber(filter, file).init();
    path
}

/// File layer (when a log file is open) plus stderr, under one filter
fn remote_subscriber(filter: EnvFilter, file: Option<File>) -> impl Subscriber + Send + Sync {
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
}
