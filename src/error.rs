//! Centralized error types for the bridge
//!
//! All bridge errors are represented by the `BridgeError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, BridgeError>`.
//!
//! Only startup and shutdown-coordination failures surface as errors.
//! Failures inside the relay loops are handled where they happen.

use std::fmt;
use std::path::PathBuf;

/// All bridge errors
#[derive(Debug)]
pub enum BridgeError {
    // === Serial ===
    /// Failed to open serial port
    SerialOpen {
        port: String,
        source: std::io::Error,
    },
    /// Failed to enumerate serial ports
    SerialEnumerate { source: std::io::Error },

    // === Network ===
    /// Failed to bind or listen on the TCP socket
    TcpBind {
        address: String,
        source: std::io::Error,
    },

    // === Lifecycle ===
    /// Failed to install SIGINT/SIGTERM handling
    SignalInstall { source: std::io::Error },
    /// Serial worker could not be joined; release ordering is lost
    WorkerJoin { reason: String },
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },

    // === Config ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for `Config`
    ConfigParse { path: PathBuf, reason: String },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SerialOpen { source, .. }
            | Self::SerialEnumerate { source }
            | Self::TcpBind { source, .. }
            | Self::SignalInstall { source }
            | Self::Runtime { source }
            | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialOpen { port, source } => {
                write!(f, "Cannot open serial port {}: {}", port, source)
            }
            Self::SerialEnumerate { source } => {
                write!(f, "Cannot enumerate serial ports: {}", source)
            }
            Self::TcpBind { address, source } => {
                write!(f, "Cannot listen on {}: {}", address, source)
            }
            Self::SignalInstall { source } => {
                write!(f, "Cannot install signal handlers: {}", source)
            }
            Self::WorkerJoin { reason } => write!(f, "Serial worker join failed: {}", reason),
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
            Self::Io { path, source } => write!(f, "IO error: {}: {}", path.display(), source),
            Self::ConfigParse { path, reason } => {
                write!(f, "Invalid config file {}: {}", path.display(), reason)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
        }
    }
}

/// Alias for Result with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
