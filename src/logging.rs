//! Logging setup: console on stderr plus a per-day log file.
//!
//! Each run appends to `<log_dir>/backup_<YYYY-MM-DD>.log`, so a long
//! unattended backup leaves a record even when the terminal is gone.
//! `RUST_LOG` overrides the default level.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Log file name for today's date.
pub fn log_file_name() -> String {
    format!("backup_{}.log", chrono::Local::now().format("%Y-%m-%d"))
}

fn default_level(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Initialize the global subscriber. Later calls are no-ops and return the
/// path chosen by the first call. Fails if some other subscriber was
/// installed first, since nothing would reach the log file.
pub fn init(log_dir: &Path, verbose: bool) -> Result<PathBuf> {
    if let Some(path) = LOG_FILE.get() {
        return Ok(path.clone());
    }

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| {
            anyhow::anyhow!(
                "Cannot log to {}: a global tracing subscriber is already installed ({})",
                path.display(),
                e
            )
        })?;

    Ok(LOG_FILE.get_or_init(|| path).clone())
}
