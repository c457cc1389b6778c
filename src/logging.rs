use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_DIR: &str = "log";
const LOG_PREFIX: &str = "agent";
const MAX_LOG_FILES: usize = 5;

/// Route all tracing output to a rotating file under `log/`, keeping the
/// terminal for conversation. Returns the guard that flushes buffered lines
/// on drop; hold it for the life of the process.
pub fn init(log_level: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(LOG_DIR)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)
        .map_err(|e| Error::config(format!("cannot open log file: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_new(level_directive(log_level)).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

/// Accepts Python-style level names alongside tracing's own.
fn level_directive(level: &str) -> String {
    match level.to_ascii_uppercase().as_str() {
        "WARNING" => "warn".into(),
        "CRITICAL" => "error".into(),
        other => other.to_ascii_lowercase(),
    }
}
