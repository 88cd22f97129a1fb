//! TCP -> serial direction, plus the accept loop
//!
//! Runs on the bridge's main task. Accepts one client at a time, forwards
//! every read to the serial device, and goes back to accepting when the
//! client leaves. Clients that connect while one is attached are refused.

use super::listener::Listener;
use super::state::{ActiveConnection, ConnectionState, SerialState};
use super::stats::Stats;
use super::SharedDevice;
use crate::logging::preview;
use crate::serial;
use crate::shutdown::Shutdown;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the network worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetWorkerState {
    Listening,
    Connected,
    /// Shutdown observed, tearing down the current client
    Draining,
    Stopped,
}

pub struct NetworkToSerialWorker {
    device: SharedDevice,
    serial: Arc<SerialState>,
    connection: Arc<ConnectionState>,
    shutdown: Shutdown,
    stats: Arc<Stats>,
    buffer_size: usize,
    accept_retry: Duration,
    next_id: u64,
    state: NetWorkerState,
}

impl NetworkToSerialWorker {
    pub fn new(
        device: SharedDevice,
        serial: Arc<SerialState>,
        connection: Arc<ConnectionState>,
        shutdown: Shutdown,
        stats: Arc<Stats>,
        buffer_size: usize,
        accept_retry: Duration,
    ) -> Self {
        Self {
            device,
            serial,
            connection,
            shutdown,
            stats,
            buffer_size,
            accept_retry,
            next_id: 0,
            state: NetWorkerState::Listening,
        }
    }

    pub fn state(&self) -> NetWorkerState {
        self.state
    }

    /// Accept and relay until shutdown
    pub async fn run(&mut self, listener: &Listener) {
        info!("Listening on {}", listener.local_addr());

        while self.shutdown.is_running() {
            self.transition(NetWorkerState::Listening);
            info!("Waiting for connection...");

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let mut next = match accepted {
                Ok(client) => Some(client),
                Err(e) => {
                    self.recover_from_accept_error(e).await;
                    None
                }
            };
            while let Some((stream, peer)) = next.take() {
                next = self.serve_client(listener, stream, peer).await;
            }
        }

        self.transition(NetWorkerState::Draining);
        if let Some(connection) = self.connection.detach() {
            info!("Closing connection to {}", connection.peer());
        }
        self.transition(NetWorkerState::Stopped);
    }

    /// Mark disconnected and back off before the next accept
    async fn recover_from_accept_error(&mut self, e: io::Error) {
        warn!("Accept failed: {}, retrying", e);
        self.transition(NetWorkerState::Listening);
        self.connection.detach();
        tokio::select! {
            _ = tokio::time::sleep(self.accept_retry) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// Relay one client until it leaves, fails, or shutdown is requested
    ///
    /// Returns a client accepted after this one was already detached, which
    /// the caller serves next.
    async fn serve_client(
        &mut self,
        listener: &Listener,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<(TcpStream, SocketAddr)> {
        let (mut reader, writer) = stream.into_split();
        self.next_id += 1;
        let id = self.next_id;

        if !self
            .connection
            .attach(ActiveConnection::new(id, peer, Box::new(writer)))
        {
            // Only this worker attaches, and it always detaches first
            error!("Connection state already attached, refusing {}", peer);
            self.stats.add_refused();
            return None;
        }
        self.stats.add_accepted();
        self.transition(NetWorkerState::Connected);
        info!("Connection from {}", peer);

        let mut buf = vec![0u8; self.buffer_size];
        let mut handoff = None;

        while self.connection.is_current(id) {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.transition(NetWorkerState::Draining);
                    break;
                }
                extra = listener.accept() => {
                    if self.connection.is_current(id) {
                        self.refuse(extra, peer).await;
                    } else {
                        // The serial side dropped this client while we were blocked
                        info!("{} already detached, taking the new client", peer);
                        match extra {
                            Ok(client) => handoff = Some(client),
                            Err(e) => warn!("Accept failed: {}", e),
                        }
                        break;
                    }
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("Connection closed by {}", peer);
                        break;
                    }
                    Ok(n) => {
                        let n = n.min(buf.len());
                        self.forward(&buf[..n], peer).await;
                    }
                    Err(e) => {
                        warn!("Read from {} failed: {}", peer, e);
                        break;
                    }
                },
            }
        }

        if let Some(connection) = self.connection.detach_if(id) {
            if let Err(e) = connection.shutdown().await {
                debug!("Shutdown of {} failed: {}", peer, e);
            }
        }
        info!("Client {} disconnected", peer);
        handoff
    }

    /// Turn away a client that connected while another is attached
    async fn refuse(&self, accepted: io::Result<(TcpStream, SocketAddr)>, current: SocketAddr) {
        match accepted {
            Ok((stream, peer)) => {
                info!("Refusing {}: {} is already connected", peer, current);
                self.stats.add_refused();
                drop(stream);
            }
            Err(e) => {
                warn!("Accept while connected failed: {}", e);
                tokio::time::sleep(self.accept_retry).await;
            }
        }
    }

    /// Send one read's bytes to the serial device, or drop them
    async fn forward(&self, data: &[u8], peer: SocketAddr) {
        trace!(len = data.len(), payload = %preview(data), "tcp rx from {}", peer);

        if !self.serial.is_open() {
            warn!("Serial port not open, dropped {} bytes from {}", data.len(), peer);
            self.stats.add_net_dropped(data.len());
            return;
        }

        let device = self.device.clone();
        let chunk = Bytes::copy_from_slice(data);
        let len = chunk.len();

        let result = tokio::task::spawn_blocking(move || {
            let mut device = device.lock();
            serial::send_all(&mut **device, &chunk)
        })
        .await;

        match result {
            Ok(Ok(())) => {
                debug!("{} -> serial: {} bytes", peer, len);
                self.stats.add_net_to_serial(len);
            }
            Ok(Err(e)) => {
                self.stats.add_net_dropped(len);
                if self.serial.set_open(false) {
                    warn!("Serial write failed: {}, marking port closed", e);
                }
            }
            Err(e) => {
                error!("Serial write task failed: {}", e);
                self.stats.add_net_dropped(len);
                self.serial.set_open(false);
            }
        }
    }

    fn transition(&mut self, next: NetWorkerState) {
        if self.state != next {
            debug!("Network worker {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
