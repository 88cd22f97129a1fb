//! TCP listening socket
//!
//! Built with socket2 so the backlog is explicit and the port can be
//! rebound right after a restart.

use crate::config::SocketConfig;
use crate::constants::LISTEN_BACKLOG;
use crate::error::{BridgeError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Listening socket for bridge clients
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Resolve, bind and listen
    ///
    /// Must be called from within the tokio runtime.
    pub fn bind(config: &SocketConfig) -> Result<Self> {
        let addr = config.resolve()?;
        let map_err = |source| BridgeError::TcpBind {
            address: config.endpoint(),
            source,
        };

        let std_listener = create_listener(addr).map_err(map_err)?;
        let inner = TcpListener::from_std(std_listener).map_err(map_err)?;
        let local_addr = inner.local_addr().map_err(map_err)?;

        Ok(Self { inner, local_addr })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next client
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY on {} failed: {}", peer, e);
        }
        Ok((stream, peer))
    }
}

/// Non-blocking listening socket with SO_REUSEADDR (Unix) and the bridge backlog
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    // On Windows SO_REUSEADDR lets another process steal the port
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
