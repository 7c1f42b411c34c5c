//! Error types for egressor.
//!
//! Uses `thiserror` for ergonomic error definitions. Run-level failures
//! (`ScanError`) stop a run before any probing; per-port failures
//! (`ProbeError`) and per-write failures (`SinkError`) never do.

use crate::types::{PortError, TargetError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single probe attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection reset")]
    ConnectionReset,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed before a response was received")]
    NoResponse,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("response body did not contain the expected marker")]
    BodyMismatch,

    #[error("internal probe error: {0}")]
    Internal(String),
}

impl ProbeError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Something that answered is final for this port, whether it declined
    /// or did not speak HTTP at all; only failures to get an answer are
    /// worth retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MalformedResponse(_)
                | Self::UnexpectedStatus(_)
                | Self::BodyMismatch
                | Self::Internal(_)
        )
    }

    /// Classify an I/O error from connecting, writing, or reading.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionReset,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::UnexpectedEof => Self::NoResponse,
            _ => {
                let message = err.to_string();
                if message.to_lowercase().contains("unreachable") {
                    Self::Unreachable(message)
                } else {
                    Self::ConnectionFailed(message)
                }
            }
        }
    }
}

/// Errors raised by result sinks.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("invalid connection string: {0}")]
    InvalidDsn(String),

    #[error("sink is not open")]
    NotOpen,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Fatal errors that abort a run before probing starts.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid port specification: {0}")]
    InvalidSpec(#[from] PortError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not open result sink: {0}")]
    SinkOpen(#[source] SinkError),
}

/// Result type alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors loading or saving settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine a home directory for configuration")]
    DirectoryNotFound,

    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("invalid settings file: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
