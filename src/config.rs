//! Configuration management
//!
//! Config file is `st-bridge.toml`, looked up next to the executable unless
//! a path is given on the command line. Every field has a default, so an
//! empty or missing file yields a working loopback bridge.

use crate::constants::{
    ACCEPT_RETRY_DELAY_MS, CONFIG_FILE_NAME, DEFAULT_BAUD_RATE, DEFAULT_SERIAL_DEVICE_ID,
    DEFAULT_TCP_ADDRESS, DEFAULT_TCP_PORT, SERIAL_BUFFER_SIZE, SERIAL_POLL_INTERVAL_MS,
    TCP_BUFFER_SIZE, WORKER_JOIN_TIMEOUT_MS,
};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialPortConfig,
    pub socket: SocketConfig,
    pub bridge: BridgeConfig,
}

// =============================================================================
// Serial Configuration
// =============================================================================

/// Serial device selection and line speed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialPortConfig {
    /// Device index, mapped to a platform port name
    pub device_id: u32,
    /// Explicit port path (overrides `device_id`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Line speed in baud
    pub baud_rate: u32,
}

impl Default for SerialPortConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_SERIAL_DEVICE_ID,
            path: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl SerialPortConfig {
    /// Port name handed to the serial driver
    pub fn port_name(&self) -> String {
        match &self.path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => device_port_name(self.device_id),
        }
    }
}

/// Map a device index to the conventional port name on this platform
fn device_port_name(id: u32) -> String {
    #[cfg(windows)]
    {
        format!("COM{}", id)
    }
    #[cfg(target_os = "macos")]
    {
        format!("/dev/cu.usbserial-{}", id)
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        format!("/dev/ttyUSB{}", id)
    }
}

// =============================================================================
// Socket Configuration
// =============================================================================

/// Listening endpoint for the TCP side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Host name or IP address to bind
    pub address: String,
    /// TCP port (0 = ephemeral)
    pub port: u16,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_TCP_ADDRESS.to_string(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl SocketConfig {
    /// `address:port` as written by the user
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Resolve to the first matching socket address
    pub fn resolve(&self) -> Result<SocketAddr> {
        let invalid = |reason: String| BridgeError::ConfigValidation {
            field: "socket.address",
            reason,
        };

        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| invalid(format!("'{}': {}", self.address, e)))?
            .next()
            .ok_or_else(|| invalid(format!("'{}' resolves to nothing", self.address)))
    }
}

// =============================================================================
// Bridge Tuning
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bytes drained from the serial device per poll
    pub serial_buffer_size: usize,
    /// Bytes drained from the TCP client per read
    pub tcp_buffer_size: usize,
    /// Delay between serial polls (also the device read timeout)
    pub poll_interval_ms: u64,
    /// Grace period for the serial worker at shutdown before it is aborted
    pub join_timeout_ms: u64,
    /// Delay before retrying a failed accept
    pub accept_retry_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_buffer_size: SERIAL_BUFFER_SIZE,
            tcp_buffer_size: TCP_BUFFER_SIZE,
            poll_interval_ms: SERIAL_POLL_INTERVAL_MS,
            join_timeout_ms: WORKER_JOIN_TIMEOUT_MS,
            accept_retry_ms: ACCEPT_RETRY_DELAY_MS,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn accept_retry(&self) -> Duration {
        Duration::from_millis(self.accept_retry_ms)
    }
}

impl Config {
    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        let reject = |field: &'static str, reason: &str| {
            Err(BridgeError::ConfigValidation {
                field,
                reason: reason.to_string(),
            })
        };

        if self.serial.baud_rate == 0 {
            return reject("serial.baud_rate", "must be non-zero");
        }
        if self.socket.address.trim().is_empty() {
            return reject("socket.address", "must not be empty");
        }
        if self.bridge.serial_buffer_size == 0 {
            return reject("bridge.serial_buffer_size", "must be non-zero");
        }
        if self.bridge.tcp_buffer_size == 0 {
            return reject("bridge.tcp_buffer_size", "must be non-zero");
        }
        if self.bridge.poll_interval_ms == 0 {
            return reject("bridge.poll_interval_ms", "must be non-zero");
        }
        // A receive blocks for up to one poll interval
        if self.bridge.join_timeout_ms <= self.bridge.poll_interval_ms {
            return reject(
                "bridge.join_timeout_ms",
                "must be longer than bridge.poll_interval_ms",
            );
        }
        Ok(())
    }
}

// =============================================================================
// File handling
// =============================================================================

/// Get the directory holding the implicit config file
///
/// Searches in order:
/// 1. Next to executable (production deployment)
/// 2. Up from target/release or target/debug (dev builds)
fn find_project_root() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;

    if exe_dir.join(CONFIG_FILE_NAME).exists() {
        return Some(exe_dir.to_path_buf());
    }

    // exe_dir = .../project/target/release, we want .../project
    let target_dir = exe_dir.parent()?;
    if target_dir.file_name().map(|n| n == "target").unwrap_or(false) {
        if let Some(project_root) = target_dir.parent() {
            if project_root.join(CONFIG_FILE_NAME).exists() {
                return Some(project_root.to_path_buf());
            }
        }
    }

    Some(exe_dir.to_path_buf())
}

/// Path of the implicit config file (may not exist)
pub fn default_path() -> Option<PathBuf> {
    find_project_root().map(|root| root.join(CONFIG_FILE_NAME))
}

/// Read and parse a config file
pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| BridgeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| BridgeError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load config
///
/// An explicit path must exist and parse. The implicit file is optional:
/// when it is missing or broken the defaults are used.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_from(path);
    }

    let Some(path) = default_path() else {
        warn!("Cannot locate executable directory, using default config");
        return Ok(Config::default());
    };

    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    match load_from(&path) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("{}, using defaults", e);
            Ok(Config::default())
        }
    }
}

/// Save config to file
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| BridgeError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|e| BridgeError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

// ============================================================================
// Tests
// ============================================================================
