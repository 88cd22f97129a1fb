//! Serial -> TCP direction
//!
//! Polls the serial device on a fixed interval and forwards each receive,
//! unmodified and in order, to whichever client is attached. Without a
//! client the bytes are dropped: the bridge is a best-effort relay and
//! never buffers or retries.

use super::state::{ConnectionState, SerialState};
use super::stats::Stats;
use super::SharedDevice;
use crate::logging::preview;
use crate::serial;
use crate::shutdown::Shutdown;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the serial worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialWorkerState {
    Running,
    /// Shutdown observed, finishing the current poll
    Draining,
    Stopped,
}

/// Outcome of one receive call
enum Poll {
    Data(Bytes),
    Idle,
    Gone(String),
    /// The bridge has taken the device back
    Closing,
}

pub struct SerialToNetworkWorker {
    device: SharedDevice,
    serial: Arc<SerialState>,
    connection: Arc<ConnectionState>,
    shutdown: Shutdown,
    stats: Arc<Stats>,
    buffer_size: usize,
    poll_interval: Duration,
    /// One permit, held by the blocking receive for as long as it runs
    in_flight: Arc<Semaphore>,
    state: SerialWorkerState,
}

impl SerialToNetworkWorker {
    pub fn new(
        device: SharedDevice,
        serial: Arc<SerialState>,
        connection: Arc<ConnectionState>,
        shutdown: Shutdown,
        stats: Arc<Stats>,
        buffer_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            device,
            serial,
            connection,
            shutdown,
            stats,
            buffer_size,
            poll_interval,
            in_flight: Arc::new(Semaphore::new(1)),
            state: SerialWorkerState::Running,
        }
    }

    /// Gate that is free only while no receive is touching the device
    ///
    /// Aborting the worker does not stop a receive already running on the
    /// blocking pool; acquiring this waits for it.
    pub fn receive_gate(&self) -> Arc<Semaphore> {
        self.in_flight.clone()
    }

    /// Poll until shutdown, returning the final state
    pub async fn run(mut self) -> SerialWorkerState {
        info!("Serial worker started");

        while self.shutdown.is_running() {
            match self.receive().await {
                Poll::Data(chunk) => self.handle_chunk(chunk).await,
                Poll::Idle => self.mark_open("responding"),
                Poll::Gone(reason) => self.mark_closed(&reason),
                Poll::Closing => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }

        self.transition(SerialWorkerState::Draining);
        self.transition(SerialWorkerState::Stopped);
        self.state
    }

    /// One blocking receive, run off the async executor
    async fn receive(&self) -> Poll {
        let device = self.device.clone();
        let size = self.buffer_size;
        let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
            return Poll::Closing;
        };

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut buf = BytesMut::zeroed(size);
            let n = device.lock().receive(&mut buf)?;
            // Never trust the driver to stay inside the buffer
            buf.truncate(n.min(size));
            Ok::<_, std::io::Error>(buf.freeze())
        })
        .await;

        match result {
            Ok(Ok(chunk)) if chunk.is_empty() => Poll::Gone("device returned 0 bytes".into()),
            Ok(Ok(chunk)) => Poll::Data(chunk),
            Ok(Err(e)) if serial::is_idle(&e) => Poll::Idle,
            Ok(Err(e)) => Poll::Gone(format!("read failed: {}", e)),
            Err(e) => {
                error!("Serial read task failed: {}", e);
                Poll::Gone("read task failed".into())
            }
        }
    }

    async fn handle_chunk(&mut self, chunk: Bytes) {
        self.mark_open("readable");

        trace!(len = chunk.len(), payload = %preview(&chunk), "serial rx");

        // Nothing new goes out once shutdown is requested
        if self.shutdown.is_requested() {
            self.transition(SerialWorkerState::Draining);
            debug!("Dropped {} serial bytes read during shutdown", chunk.len());
            self.stats.add_serial_dropped(chunk.len());
            return;
        }

        let Some(connection) = self.connection.get() else {
            debug!("No TCP client, dropped {} serial bytes", chunk.len());
            self.stats.add_serial_dropped(chunk.len());
            return;
        };

        match connection.write_all(&chunk).await {
            Ok(()) => {
                debug!("serial -> {}: {} bytes", connection.peer(), chunk.len());
                self.stats.add_serial_to_net(chunk.len());
            }
            Err(e) => {
                warn!(
                    "Write to {} failed: {}, dropping client",
                    connection.peer(),
                    e
                );
                self.stats.add_serial_dropped(chunk.len());
                if self.connection.detach_if(connection.id()).is_some() {
                    info!("Client {} marked disconnected", connection.peer());
                }
            }
        }
    }

    /// A receive that reached the device proves it is present
    fn mark_open(&self, how: &str) {
        if self.serial.set_open(true) {
            info!("Serial device {} again, marking port open", how);
        }
    }

    fn mark_closed(&self, reason: &str) {
        if self.serial.set_open(false) {
            warn!("Serial device unavailable ({}), marking port closed", reason);
        } else {
            trace!("Serial device still unavailable ({})", reason);
        }
    }

    fn transition(&mut self, next: SerialWorkerState) {
        if self.state != next {
            debug!("Serial worker {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
