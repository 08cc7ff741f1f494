//! Logging setup: a daily-rotated log file mirrored to the console.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Base name of the log file; rotated files get a date suffix.
pub const LOG_FILE_NAME: &str = "hooman.log";

/// Verbosity accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    /// Same as `error`; kept for compatibility with existing service files.
    Critical,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

/// Errors that prevent logging from starting.
#[derive(Debug)]
pub enum LoggingError {
    /// No log directory was configured and no home directory was found.
    NoLogDirectory,
    /// The log directory could not be created.
    DirectoryCreationFailed { path: PathBuf, source: io::Error },
    /// A global subscriber is already installed.
    AlreadyInitialized(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLogDirectory => write!(f, "Could not determine a log directory"),
            Self::DirectoryCreationFailed { path, source } => {
                write!(
                    f,
                    "Failed to create log directory {}: {}",
                    path.display(),
                    source
                )
            }
            Self::AlreadyInitialized(msg) => write!(f, "Logging already initialized: {}", msg),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Default log directory: `%APPDATA%` on Windows, the home directory elsewhere.
pub fn default_log_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::config_dir()
    } else {
        dirs::home_dir()
    }
}

/// Builds the level filter. `RUST_LOG` wins over the command-line level.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.to_level_filter().into())
        .from_env_lossy()
}

/// Installs the global subscriber.
///
/// Writes to `<log_dir>/hooman.log` (rotated at midnight) and to stdout. Each
/// line carries a timestamp, the level and the source location. Keep the
/// returned guard alive for the life of the process; dropping it flushes and
/// stops the file writer.
pub fn init_logging(level: LogLevel, log_dir: Option<&Path>) -> Result<WorkerGuard, LoggingError> {
    let log_dir = match log_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_log_dir().ok_or(LoggingError::NoLogDirectory)?,
    };
    fs::create_dir_all(&log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_filter(build_filter(level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_filter(build_filter(level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(guard)
}
