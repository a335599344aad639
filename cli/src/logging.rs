//! Tracing setup for the murmur binary
//!
//! Logs go to stderr unless `--log-file` is given, in which case they are
//! appended to murmur.log under the platform log directory.

use config::PathManager;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// RUST_LOG wins over the configured filter, which wins over the default
fn build_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        configured
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    })
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop, so hold it for the
/// lifetime of the program.
pub fn init_logging(configured: Option<&str>, to_file: bool) -> Option<WorkerGuard> {
    if to_file {
        match open_log_file() {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let subscriber = tracing_subscriber::registry()
                    .with(build_filter(configured))
                    .with(
                        fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .with_target(true)
                            .with_file(true)
                            .with_line_number(true),
                    );
                match tracing::subscriber::set_global_default(subscriber) {
                    Ok(()) => return Some(guard),
                    Err(e) => {
                        eprintln!("[murmur] Failed to set tracing subscriber: {}", e);
                        return None;
                    }
                }
            }
            Err(e) => eprintln!("[murmur] {}, logging to stderr", e),
        }
    }

    init_stderr_logging(configured);
    None
}

fn init_stderr_logging(configured: Option<&str>) {
    let subscriber = tracing_subscriber::registry()
        .with(build_filter(configured))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("[murmur] Failed to set tracing subscriber: {}", e);
    }
}

fn open_log_file() -> Result<std::fs::File, String> {
    let path = PathManager::log_file_path().ok_or("No log directory available")?;
    PathManager::ensure_dirs_exist()
        .map_err(|e| format!("Failed to create murmur directories: {}", e))?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to open log file {:?}: {}", path, e))
}
