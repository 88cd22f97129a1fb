//! Shared state between the two relay directions
//!
//! Two independent locks: one for the TCP side, one for the serial side.
//! Neither lock is held across I/O; accessors lock, copy or assign, unlock.

use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write half of an accepted client connection
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle to the attached TCP client
///
/// Cheap to clone. The socket's write half lives behind its own async lock
/// so a forward never holds the `ConnectionState` lock while writing.
#[derive(Clone)]
pub struct ActiveConnection {
    id: u64,
    peer: SocketAddr,
    writer: Arc<tokio::sync::Mutex<ConnectionWriter>>,
}

impl ActiveConnection {
    pub fn new(id: u64, peer: SocketAddr, writer: ConnectionWriter) -> Self {
        Self {
            id,
            peer,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        }
    }

    /// Sequence number of the accept that produced this connection
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write the whole chunk to the client
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Send FIN to the client
    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Whether a TCP client is attached, and which one
///
/// At most one connection is attached at a time.
#[derive(Default)]
pub struct ConnectionState {
    active: Mutex<Option<ActiveConnection>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the attached connection
    pub fn get(&self) -> Option<ActiveConnection> {
        self.active.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    /// True while connection `id` is the attached one
    pub fn is_current(&self, id: u64) -> bool {
        self.active.lock().as_ref().map(|c| c.id == id).unwrap_or(false)
    }

    /// Attach a freshly accepted connection
    ///
    /// Returns false, leaving the state untouched, if a client is already attached.
    pub fn attach(&self, connection: ActiveConnection) -> bool {
        let mut active = self.active.lock();
        if active.is_some() {
            return false;
        }
        *active = Some(connection);
        true
    }

    /// Mark disconnected, returning the connection that was attached
    pub fn detach(&self) -> Option<ActiveConnection> {
        self.active.lock().take()
    }

    /// Detach only if connection `id` is still the attached one
    pub fn detach_if(&self, id: u64) -> Option<ActiveConnection> {
        let mut active = self.active.lock();
        if active.as_ref().map(|c| c.id == id).unwrap_or(false) {
            active.take()
        } else {
            None
        }
    }
}

/// Whether the serial device is usable
pub struct SerialState {
    open: Mutex<bool>,
}

impl SerialState {
    pub fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Set the flag, returning true if this changed it
    pub fn set_open(&self, open: bool) -> bool {
        let mut current = self.open.lock();
        let changed = *current != open;
        *current = open;
        changed
    }
}
