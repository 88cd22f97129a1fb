//! Serial <-> TCP bridge
//!
//! Relays raw bytes between one serial device and one TCP client:
//! - Serial -> TCP: a spawned task polls the device (`serial_to_net`)
//! - TCP -> serial: the caller's task accepts and reads clients (`net_to_serial`)
//!
//! The two directions share nothing but `ConnectionState`, `SerialState`
//! and the shutdown flag. Data is forwarded best-effort: when the
//! destination is missing, bytes are dropped rather than buffered.
//!
//! # Lifecycle
//!
//! 1. `Bridge::start` opens the serial device, binds the listener, then
//!    spawns the serial worker (in that order)
//! 2. `Bridge::run` drives the network worker until shutdown is requested
//! 3. Teardown: join the serial worker, close the device, release the listener

pub mod listener;
pub mod net_to_serial;
pub mod serial_to_net;
pub mod state;
pub mod stats;

use self::listener::Listener;
use self::net_to_serial::NetworkToSerialWorker;
use self::serial_to_net::{SerialToNetworkWorker, SerialWorkerState};
use self::state::{ConnectionState, SerialState};
use self::stats::Stats;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::serial::{SerialDevice, SerialDriver};
use crate::shutdown::Shutdown;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Device handle owned by one worker
pub type SharedDevice = Arc<Mutex<Box<dyn SerialDevice>>>;

/// A started bridge
///
/// Owns the serial device, the listener and the serial worker task.
pub struct Bridge {
    device: Box<dyn SerialDevice>,
    port_name: String,
    listener: Listener,
    network: NetworkToSerialWorker,
    serial_task: JoinHandle<SerialWorkerState>,
    receive_gate: Arc<Semaphore>,
    connection: Arc<ConnectionState>,
    serial: Arc<SerialState>,
    stats: Arc<Stats>,
    shutdown: Shutdown,
    join_timeout: Duration,
}

impl Bridge {
    /// Open the serial device, bind the listener and spawn the serial worker
    ///
    /// Must be called from within the tokio runtime. Any failure here is a
    /// fatal startup error; resources acquired so far are released.
    pub fn start<D>(config: &Config, driver: &D, shutdown: Shutdown) -> Result<Self>
    where
        D: SerialDriver + ?Sized,
    {
        config.validate()?;

        let port_name = config.serial.port_name();
        info!(
            "Opening serial port {} @ {} baud",
            port_name, config.serial.baud_rate
        );
        let mut device = driver.open(&config.serial, config.bridge.poll_interval())?;
        let serial = Arc::new(SerialState::new(true));

        info!("Starting TCP server on {}", config.socket.endpoint());
        let listener = match Listener::bind(&config.socket) {
            Ok(listener) => listener,
            Err(e) => {
                device.close();
                return Err(e);
            }
        };

        let (reader, writer) = match clone_pair(device.as_ref()) {
            Ok(pair) => pair,
            Err(e) => {
                device.close();
                return Err(BridgeError::SerialOpen {
                    port: port_name,
                    source: e,
                });
            }
        };

        let connection = Arc::new(ConnectionState::new());
        let stats = Arc::new(Stats::new());

        let serial_worker = SerialToNetworkWorker::new(
            reader,
            serial.clone(),
            connection.clone(),
            shutdown.clone(),
            stats.clone(),
            config.bridge.serial_buffer_size,
            config.bridge.poll_interval(),
        );
        let receive_gate = serial_worker.receive_gate();
        let serial_task = tokio::spawn(serial_worker.run());

        let network = NetworkToSerialWorker::new(
            writer,
            serial.clone(),
            connection.clone(),
            shutdown.clone(),
            stats.clone(),
            config.bridge.tcp_buffer_size,
            config.bridge.accept_retry(),
        );

        Ok(Self {
            device,
            port_name,
            listener,
            network,
            serial_task,
            receive_gate,
            connection,
            serial,
            stats,
            shutdown,
            join_timeout: config.bridge.join_timeout(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn connection_state(&self) -> Arc<ConnectionState> {
        self.connection.clone()
    }

    pub fn serial_state(&self) -> Arc<SerialState> {
        self.serial.clone()
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Relay until shutdown is requested, then tear down in order
    pub async fn run(mut self) -> Result<()> {
        self.network.run(&self.listener).await;

        // The network worker only returns once shutdown is requested
        self.shutdown.trigger();

        let Self {
            mut device,
            port_name,
            listener,
            network,
            serial_task,
            receive_gate,
            stats,
            join_timeout,
            ..
        } = self;

        let joined = join_serial_worker(serial_task, join_timeout).await;
        wait_for_receive(&receive_gate).await;
        drop(network);

        device.close();
        drop(device);
        info!("Serial port {} closed", port_name);

        drop(listener);
        info!("TCP listener released");

        info!("Bridge stopped: {}", stats.snapshot());
        joined
    }
}

/// Wait out a blocking receive that outlived its worker, then shut the gate
async fn wait_for_receive(gate: &Semaphore) {
    if gate.available_permits() == 0 {
        debug!("Waiting for in-flight serial receive");
    }
    if let Ok(permit) = gate.acquire().await {
        permit.forget();
    }
    gate.close();
}

/// Independent handles for the two workers
fn clone_pair(device: &dyn SerialDevice) -> std::io::Result<(SharedDevice, SharedDevice)> {
    let reader = device.try_clone()?;
    let writer = device.try_clone()?;
    Ok((Arc::new(Mutex::new(reader)), Arc::new(Mutex::new(writer))))
}

/// Wait for the serial worker, aborting it if it overstays `timeout`
///
/// Returns only once the task has finished, so the device can be closed.
async fn join_serial_worker(
    mut task: JoinHandle<SerialWorkerState>,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(state)) => {
            info!("Serial worker finished ({:?})", state);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Serial worker failed: {}", e);
            Err(BridgeError::WorkerJoin {
                reason: e.to_string(),
            })
        }
        Err(_) => {
            warn!(
                "Serial worker still running after {:?}, aborting",
                timeout
            );
            task.abort();
            match task.await {
                Ok(state) => {
                    info!("Serial worker finished ({:?})", state);
                    Ok(())
                }
                Err(e) if e.is_cancelled() => {
                    info!("Serial worker cancelled");
                    Ok(())
                }
                Err(e) => Err(BridgeError::WorkerJoin {
                    reason: e.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialPortConfig;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct SlowState {
        receiving: AtomicBool,
        closed_mid_receive: AtomicBool,
        closes: AtomicUsize,
    }

    /// Device whose every receive blocks well past the join timeout
    #[derive(Clone, Default)]
    struct SlowSerial {
        state: Arc<SlowState>,
    }

    impl SerialDevice for SlowSerial {
        fn send(&mut self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn receive(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            self.state.receiving.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            self.state.receiving.store(false, Ordering::SeqCst);
            Err(io::ErrorKind::TimedOut.into())
        }

        fn try_clone(&self) -> io::Result<Box<dyn SerialDevice>> {
            Ok(Box::new(self.clone()))
        }

        fn close(&mut self) {
            if self.state.receiving.load(Ordering::SeqCst) {
                self.state.closed_mid_receive.store(true, Ordering::SeqCst);
            }
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SerialDriver for SlowSerial {
        fn open(&self, _: &SerialPortConfig, _: Duration) -> Result<Box<dyn SerialDevice>> {
            Ok(Box::new(self.clone()))
        }
    }

    #[tokio::test]
    async fn test_close_waits_for_aborted_receive() {
        let mut config = Config::default();
        config.socket.port = 0;
        config.bridge.poll_interval_ms = 5;
        config.bridge.join_timeout_ms = 20;
        let device = SlowSerial::default();

        let bridge = Bridge::start(&config, &device, Shutdown::new()).unwrap();
        let shutdown = bridge.shutdown_handle();
        let run = tokio::spawn(bridge.run());

        for _ in 0..500 {
            if device.state.receiving.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(device.state.receiving.load(Ordering::SeqCst));
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("bridge did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(device.state.closes.load(Ordering::SeqCst), 1);
        assert!(!device.state.closed_mid_receive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_wait_for_receive_closes_gate() {
        let gate = Semaphore::new(1);
        wait_for_receive(&gate).await;
        assert!(gate.try_acquire().is_err());
        assert_eq!(gate.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_join_finished_worker() {
        let task = tokio::spawn(async { SerialWorkerState::Stopped });
        assert!(join_serial_worker(task, Duration::from_millis(100))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_join_aborts_stuck_worker() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            SerialWorkerState::Stopped
        });
        let joined = tokio::time::timeout(
            Duration::from_secs(1),
            join_serial_worker(task, Duration::from_millis(20)),
        )
        .await
        .expect("join did not return");
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn test_join_reports_panicked_worker() {
        let task: JoinHandle<SerialWorkerState> = tokio::spawn(async { panic!("boom") });
        assert!(matches!(
            join_serial_worker(task, Duration::from_millis(500)).await,
            Err(BridgeError::WorkerJoin { .. })
        ));
    }
}
