//! Application-wide constants
//!
//! Centralized defaults to avoid duplication between config, CLI and tests.

// =============================================================================
// Network
// =============================================================================

/// Default listening address
pub const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1";

/// Default listening TCP port
pub const DEFAULT_TCP_PORT: u16 = 10000;

/// Pending-connection backlog passed to listen()
pub const LISTEN_BACKLOG: i32 = 10;

// =============================================================================
// Serial
// =============================================================================

/// Default serial device index
pub const DEFAULT_SERIAL_DEVICE_ID: u32 = 1;

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// =============================================================================
// Buffers
// =============================================================================

/// Bytes drained from the serial device per poll
pub const SERIAL_BUFFER_SIZE: usize = 50;

/// Bytes drained from the TCP client per read
pub const TCP_BUFFER_SIZE: usize = 32;

// =============================================================================
// Timing
// =============================================================================

/// Delay between serial polls (milliseconds)
pub const SERIAL_POLL_INTERVAL_MS: u64 = 100;

/// Grace period for the serial worker to stop before it is aborted (milliseconds)
pub const WORKER_JOIN_TIMEOUT_MS: u64 = 1000;

/// Delay before retrying a failed accept (milliseconds)
pub const ACCEPT_RETRY_DELAY_MS: u64 = 100;

/// Longest payload preview written to trace logs
pub const PAYLOAD_PREVIEW_LEN: usize = 64;

// =============================================================================
// Files
// =============================================================================

/// Config file name looked up next to the executable
pub const CONFIG_FILE_NAME: &str = "st-bridge.toml";
