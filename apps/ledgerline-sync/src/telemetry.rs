use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Full `EnvFilter` directive string; replaces the level-derived default.
pub const FILTER_VAR: &str = "LEDGERLINE_LOG_FILTER";

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes buffered log lines when dropped; hold it for the life of `main`.
#[must_use]
pub struct LogGuard(#[allow(dead_code)] WorkerGuard);

/// Installs the global subscriber.
pub fn init(config: &LogConfig) -> Result<LogGuard, InitError> {
    let directives = filter_directives(config.level, std::env::var(FILTER_VAR).ok());

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(directives))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(config.file.is_none())
                .with_target(config.level == LogLevel::Debug || config.level == LogLevel::Trace),
        )
        .try_init()?;

    Ok(LogGuard(guard))
}

// Verbose levels only open up our own targets; socket internals stay at info.
fn filter_directives(level: LogLevel, override_filter: Option<String>) -> String {
    if let Some(filter) = override_filter.filter(|f| !f.trim().is_empty()) {
        return filter;
    }
    let level = LevelFilter::from(level);
    if level > LevelFilter::INFO {
        format!("info,ledgerline={level},ledgerline_sync={level}")
    } else {
        level.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_levels_are_scoped_to_sync_targets() {
        assert_eq!(
            filter_directives(LogLevel::Trace, None),
            "info,ledgerline=trace,ledgerline_sync=trace"
        );
        assert_eq!(
            filter_directives(LogLevel::Debug, None),
            "info,ledgerline=debug,ledgerline_sync=debug"
        );
        assert_eq!(filter_directives(LogLevel::Warn, None), "warn");
        assert_eq!(filter_directives(LogLevel::default(), None), "info");
    }

    #[test]
    fn explicit_filter_wins_unless_blank() {
        let filter = "ledgerline.transport=trace,warn".to_string();
        assert_eq!(
            filter_directives(LogLevel::Error, Some(filter.clone())),
            filter
        );
        assert_eq!(filter_directives(LogLevel::Error, Some("  ".into())), "error");
    }
}
