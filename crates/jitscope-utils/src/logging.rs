//! # Logging Utilities
//!
//! Logging infrastructure for jitscope using `tracing`.
//!
//! This module provides structured logging with support for:
//! - JSON output for machines and pretty output for people
//! - Environment variable configuration
//! - Daily rolling log files written off the calling thread
//!
//! Console output goes to stderr so that command output on stdout stays
//! machine-readable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jitscope_utils::init_logging;
//!
//! // Keep the guard alive for as long as the program logs
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=jitscope_core=trace`)
//! - `JITSCOPE_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `JITSCOPE_LOG_FILE`: Optional path to a log file, written in addition to the console
//!
//! ## Examples
//!
//! ```rust,no_run
//! use jitscope_utils::{init_logging_with_level, LogFormat, LogLevel};
//!
//! // Explicit level, console only
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty).expect("Failed to initialize logging");
//! ```
//!
//! ```rust,no_run
//! use jitscope_utils::{init_logging_to_file, LogFormat, LogLevel};
//!
//! // File only, e.g. while stdout carries a live display
//! let _guard = init_logging_to_file("/tmp/jitscope.log", LogFormat::Json, Some(LogLevel::Trace))
//!     .expect("Failed to initialize logging");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const FORMAT_VAR: &str = "JITSCOPE_LOG_FORMAT";
const FILE_VAR: &str = "JITSCOPE_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    #[default]
    Pretty,
    /// JSON format, one object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'")),
        }
    }
}

/// Keeps the background log writer running.
///
/// Dropping it flushes and stops file logging; console logging is unaffected.
#[derive(Debug)]
#[must_use = "file logging stops when the guard is dropped"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `jitscope_core=trace`), default `info`
/// - `JITSCOPE_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `JITSCOPE_LOG_FILE`: Optional path to log file
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `JITSCOPE_LOG_FORMAT` holds an unknown format
/// - The log file directory cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(FORMAT_VAR) {
        Ok(value) => value.parse::<LogFormat>().map_err(LoggingError::InvalidFormat)?,
        Err(_) => LogFormat::default(),
    };
    let log_file = env::var_os(FILE_VAR).map(PathBuf::from);

    init(format, None, true, log_file.as_deref())
}

/// Initialize console logging with an explicit level and format
///
/// `RUST_LOG` is ignored; `JITSCOPE_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let log_file = env::var_os(FILE_VAR).map(PathBuf::from);
    init(format, Some(level), true, log_file.as_deref())
}

/// Initialize file-only logging (nothing is written to the console)
///
/// The file rolls over daily; each day's file gets the date appended to its name.
///
/// ## Parameters
///
/// - `path`: log file path; its directory is created if missing
/// - `format`: output format for the file
/// - `level`: explicit level, or `None` to use `RUST_LOG` (default `info`)
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the directory cannot be created.
pub fn init_logging_to_file(
    path: impl AsRef<Path>,
    format: LogFormat,
    level: Option<LogLevel>,
) -> Result<LoggingGuard, LoggingError>
{
    init(format, level, false, Some(path.as_ref()))
}

fn init(format: LogFormat, level: Option<LogLevel>, console: bool, log_file: Option<&Path>)
    -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if console {
        layers.push(format_layer(fmt::layer().with_writer(io::stderr).with_ansi(true), format, filter(level)));
    }

    let mut guard = None;
    if let Some(path) = log_file {
        let (writer, file_guard) = file_writer(path)?;
        layers.push(format_layer(fmt::layer().with_writer(writer).with_ansi(false), format, filter(level)));
        guard = Some(file_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

/// Filter from an explicit level, else `RUST_LOG`, else `info`.
fn filter(level: Option<LogLevel>) -> EnvFilter
{
    match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn format_layer<W>(
    layer: fmt::Layer<Registry, fmt::format::DefaultFields, fmt::format::Format, W>,
    format: LogFormat,
    filter: EnvFilter,
) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = layer
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).with_filter(filter).boxed(),
    }
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), LoggingError>
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidPath(path.display().to_string()))?;

    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::daily(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Log file path has no file name
    #[error("Invalid log file path: {0}")]
    InvalidPath(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
