//! Diagnostic logging for the binary.
//!
//! Library code only emits `tracing` events; the binary decides where they go.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives, e.g. `confab=debug`.
pub const LOG_ENV: &str = "CONFAB_LOG";
const DEFAULT_FILTER: &str = "warn";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Logs go to stderr, or are appended to
/// `log_file` without colour codes.
pub fn init(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match log_file {
        Some(path) => {
            let file = open_log_file(path)
                .map_err(|err| format!("cannot open log file {}: {err}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| err.to_string())?;
        }
        None => builder
            .with_writer(io::stderr)
            .try_init()
            .map_err(|err| err.to_string())?,
    }
    Ok(())
}
