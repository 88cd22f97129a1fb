//! Traffic statistics for the bridge
//!
//! Thread-safe counters shared by both relay directions.
//! Uses lock-free atomics for all operations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic counters (fully lock-free)
#[derive(Default)]
pub struct Stats {
    /// Bytes forwarded serial -> TCP client
    serial_to_net_bytes: AtomicU64,
    /// Receive calls forwarded serial -> TCP client
    serial_to_net_chunks: AtomicU64,
    /// Bytes forwarded TCP client -> serial
    net_to_serial_bytes: AtomicU64,
    /// Reads forwarded TCP client -> serial
    net_to_serial_chunks: AtomicU64,
    /// Serial bytes dropped (no client attached, or write failed)
    serial_dropped_bytes: AtomicU64,
    /// Client bytes dropped (serial port not open, or send failed)
    net_dropped_bytes: AtomicU64,
    /// Clients attached
    accepted: AtomicU64,
    /// Clients turned away while another was attached
    refused: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_serial_to_net(&self, bytes: usize) {
        self.serial_to_net_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.serial_to_net_chunks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_net_to_serial(&self, bytes: usize) {
        self.net_to_serial_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.net_to_serial_chunks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_serial_dropped(&self, bytes: usize) {
        self.serial_dropped_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_net_dropped(&self, bytes: usize) {
        self.net_dropped_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            serial_to_net_bytes: self.serial_to_net_bytes.load(Ordering::Relaxed),
            serial_to_net_chunks: self.serial_to_net_chunks.load(Ordering::Relaxed),
            net_to_serial_bytes: self.net_to_serial_bytes.load(Ordering::Relaxed),
            net_to_serial_chunks: self.net_to_serial_chunks.load(Ordering::Relaxed),
            serial_dropped_bytes: self.serial_dropped_bytes.load(Ordering::Relaxed),
            net_dropped_bytes: self.net_dropped_bytes.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub serial_to_net_bytes: u64,
    pub serial_to_net_chunks: u64,
    pub net_to_serial_bytes: u64,
    pub net_to_serial_chunks: u64,
    pub serial_dropped_bytes: u64,
    pub net_dropped_bytes: u64,
    pub accepted: u64,
    pub refused: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "serial->tcp {} B in {} chunks ({} B dropped), tcp->serial {} B in {} chunks ({} B dropped), {} clients, {} refused",
            self.serial_to_net_bytes,
            self.serial_to_net_chunks,
            self.serial_dropped_bytes,
            self.net_to_serial_bytes,
            self.net_to_serial_chunks,
            self.net_dropped_bytes,
            self.accepted,
            self.refused,
        )
    }
}
