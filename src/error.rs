//! # Error Types Module
//!
//! Centralized error handling for the acquisition monitor.
//! Each concern gets its own error enum so callers can match on the
//! failure they actually care about.
//!
//! ## Error Types
//! - `ConfigError`: Configuration file I/O and parsing errors
//! - `TransportError`: Datagram socket bind/receive failures and shutdown
//! - `DecodeError`: Malformed sensor payloads (never fatal)
//! - `RecorderError`: Session log creation and write failures
//! - `ControlError`: Unreadable control channel envelopes
//! - `ChartError`: Offline debrief chart failures
//! - `AppError`: Top-level failures reported by `main`
//!
//! ## Fatal vs. Recoverable
//! Only `TransportError::Bind`, `ConfigError` and `AppError::View` stop the
//! process. Everything else is logged and the receive loop keeps going.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(io::Error),
    /// Failed to write config file
    WriteFailed(io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// A value parsed but is outside its usable range
    Invalid { field: &'static str, reason: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::WriteFailed(e) => write!(f, "Failed to write config file: {}", e),
            ConfigError::ParseFailed(e) => write!(f, "Failed to parse config file: {}", e),
            ConfigError::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid config value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Errors from the datagram receiver
#[derive(Debug)]
pub enum TransportError {
    /// Could not bind the listening socket (port in use, bad address)
    Bind { addr: String, source: io::Error },
    /// The receiver was closed; no more datagrams will arrive
    Closed,
    /// Any other receive failure
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Bind { addr, source } => {
                write!(f, "Failed to bind UDP socket on {}: {}", addr, source)
            }
            TransportError::Closed => write!(f, "Receiver has been closed"),
            TransportError::Io(e) => write!(f, "Failed to receive datagram: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Bind { source, .. } => Some(source),
            TransportError::Io(e) => Some(e),
            TransportError::Closed => None,
        }
    }
}

/// Reasons a sensor payload is rejected
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload bytes are not valid UTF-8
    NotUtf8,
    /// Single-value payload without the expected `GSR:` tag
    MissingPrefix,
    /// Wrong number of comma-separated fields
    FieldCount { expected: usize, found: usize },
    /// A field could not be parsed as a number
    InvalidNumber { field: &'static str },
    /// A field parsed but is not physically meaningful (NaN, infinite, non-positive IBI)
    OutOfRange { field: &'static str },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotUtf8 => write!(f, "payload is not valid UTF-8"),
            DecodeError::MissingPrefix => write!(f, "payload is missing the GSR: tag"),
            DecodeError::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            DecodeError::InvalidNumber { field } => write!(f, "field {} is not a number", field),
            DecodeError::OutOfRange { field } => write!(f, "field {} is out of range", field),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur while writing the session log
#[derive(Debug)]
pub enum RecorderError {
    /// Failed to create the log directory
    CreateDir { path: PathBuf, source: io::Error },
    /// Failed to create the log file
    CreateFile { path: PathBuf, source: io::Error },
    /// Failed to write a CSV row
    Write(csv::Error),
    /// Failed to flush written rows to disk
    Flush(io::Error),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::CreateDir { path, source } => {
                write!(f, "Failed to create log directory {}: {}", path.display(), source)
            }
            RecorderError::CreateFile { path, source } => {
                write!(f, "Failed to create log file {}: {}", path.display(), source)
            }
            RecorderError::Write(e) => write!(f, "Failed to write log record: {}", e),
            RecorderError::Flush(e) => write!(f, "Failed to flush log file: {}", e),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::CreateDir { source, .. } => Some(source),
            RecorderError::CreateFile { source, .. } => Some(source),
            RecorderError::Write(e) => Some(e),
            RecorderError::Flush(e) => Some(e),
        }
    }
}

impl From<csv::Error> for RecorderError {
    fn from(err: csv::Error) -> Self {
        RecorderError::Write(err)
    }
}

/// Errors parsing control channel envelopes
#[derive(Debug)]
pub enum ControlError {
    /// Message was not valid JSON of the expected shape
    Json(serde_json::Error),
    /// Envelope has no `event` field
    MissingEvent,
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Json(e) => write!(f, "Invalid control envelope: {}", e),
            ControlError::MissingEvent => write!(f, "Control envelope has no event name"),
        }
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControlError::Json(e) => Some(e),
            ControlError::MissingEvent => None,
        }
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::Json(err)
    }
}

/// Errors that abort an offline chart invocation
#[derive(Debug)]
pub enum ChartError {
    /// The session log does not exist
    MissingInput(PathBuf),
    /// The session log could not be read as CSV
    Read(csv::Error),
    /// The log header lacks a required column
    MissingColumn(String),
    /// No rows belong to a recognised experimental phase
    NoExperimentalData,
    /// Could not create the output directory
    CreateDir { path: PathBuf, source: io::Error },
    /// The plotting backend failed
    Render(String),
}

impl fmt::Display for ChartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartError::MissingInput(path) => {
                write!(f, "Session log not found: {}", path.display())
            }
            ChartError::Read(e) => write!(f, "Failed to read session log: {}", e),
            ChartError::MissingColumn(name) => {
                write!(f, "Session log has no '{}' column", name)
            }
            ChartError::NoExperimentalData => {
                write!(f, "No rows from experimental phases were found in the session log")
            }
            ChartError::CreateDir { path, source } => {
                write!(f, "Failed to create output directory {}: {}", path.display(), source)
            }
            ChartError::Render(msg) => write!(f, "Failed to render chart: {}", msg),
        }
    }
}

impl std::error::Error for ChartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChartError::Read(e) => Some(e),
            ChartError::CreateDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<csv::Error> for ChartError {
    fn from(err: csv::Error) -> Self {
        ChartError::Read(err)
    }
}

/// Top-level failures reported by `main`
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Transport(TransportError),
    Recorder(RecorderError),
    Chart(ChartError),
    /// Worker thread could not be spawned
    Spawn(io::Error),
    /// The windowing/plotting toolkit could not start
    View(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Transport(e) => write!(f, "{}", e),
            AppError::Recorder(e) => write!(f, "{}", e),
            AppError::Chart(e) => write!(f, "{}", e),
            AppError::Spawn(e) => write!(f, "Failed to start worker thread: {}", e),
            AppError::View(msg) => write!(
                f,
                "Live view is unavailable ({}). Use --generate-graph for offline charts.",
                msg
            ),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::Transport(e) => Some(e),
            AppError::Recorder(e) => Some(e),
            AppError::Chart(e) => Some(e),
            AppError::Spawn(e) => Some(e),
            AppError::View(_) => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::Transport(err)
    }
}

impl From<RecorderError> for AppError {
    fn from(err: RecorderError) -> Self {
        AppError::Recorder(err)
    }
}

impl From<ChartError> for AppError {
    fn from(err: ChartError) -> Self {
        AppError::Chart(err)
    }
}
