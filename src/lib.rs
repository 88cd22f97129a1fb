//! Serial <-> TCP bridge
//!
//! Relays raw bytes between one serial device and one TCP client. See
//! [`bridge`] for the relay itself; the other modules are the plumbing
//! around it (config, CLI, logging, signals, device access).

pub mod bridge;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod serial;
pub mod shutdown;

pub use bridge::Bridge;
pub use config::Config;
pub use error::{BridgeError, Result};
pub use shutdown::Shutdown;
