//! Tracing setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogFormat;
use crate::error::{MonitorError, Result};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "vpnmon=info,vpnmon_daemon=info,vpnmon_store=info";

/// Install the global subscriber.
///
/// Logs go to stdout in `format`. When `log_file` is set they are also
/// appended to that file; keep the returned guard alive until exit so the
/// file writer flushes.
///
/// # Errors
///
/// Returns [`MonitorError::Logging`] if the filter is invalid, the log file
/// cannot be opened, or a subscriber is already installed.
pub fn init(format: LogFormat, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER),
    }
    .map_err(|e| MonitorError::Logging(format!("invalid log filter: {e}")))?;

    let (file_writer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_append(path)?);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stdout)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stdout)),
        ),
    };
    let file = file_writer.map(|writer| fmt::layer().with_ansi(false).with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(file)
        .try_init()
        .map_err(|e| MonitorError::Logging(e.to_string()))?;

    Ok(guard)
}

fn open_append(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            MonitorError::Logging(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MonitorError::Logging(format!("cannot open {}: {e}", path.display())))
}
