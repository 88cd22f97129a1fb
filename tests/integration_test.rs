//! Integration tests for the serial <-> TCP bridge
//!
//! Runs the full bridge over loopback TCP against the mock serial device.

use proptest::prelude::*;
use serial_tcp_bridge::bridge::state::{ConnectionState, SerialState};
use serial_tcp_bridge::bridge::stats::Stats;
use serial_tcp_bridge::serial::mock::{MockDriver, MockSerial, WhenEmpty};
use serial_tcp_bridge::{Bridge, BridgeError, Config, Shutdown};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

// =============================================================================
// Harness
// =============================================================================

fn test_config() -> Config {
    let mut config = Config::default();
    config.socket.port = 0;
    config.bridge.poll_interval_ms = 5;
    config.bridge.join_timeout_ms = 500;
    config
}

struct Harness {
    mock: MockSerial,
    addr: SocketAddr,
    shutdown: Shutdown,
    connection: Arc<ConnectionState>,
    serial: Arc<SerialState>,
    stats: Arc<Stats>,
    task: JoinHandle<serial_tcp_bridge::Result<()>>,
}

impl Harness {
    fn start(mock: MockSerial) -> Self {
        let shutdown = Shutdown::new();
        let bridge = Bridge::start(&test_config(), &MockDriver::new(mock.clone()), shutdown)
            .expect("bridge start");

        Self {
            addr: bridge.local_addr(),
            shutdown: bridge.shutdown_handle(),
            connection: bridge.connection_state(),
            serial: bridge.serial_state(),
            stats: bridge.stats(),
            task: tokio::spawn(bridge.run()),
            mock,
        }
    }

    async fn connect(&self) -> TcpStream {
        let accepted = self.stats.snapshot().accepted;
        let stream = TcpStream::connect(self.addr).await.unwrap();
        self.wait_until("client attached", || {
            self.stats.snapshot().accepted > accepted && self.connection.is_connected()
        })
        .await;
        stream
    }

    async fn wait_until(&self, what: &str, cond: impl Fn() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("bridge did not stop")
            .unwrap()
            .expect("bridge run failed");
        assert_eq!(self.mock.close_count(), 1);
    }
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading from bridge")
        .unwrap();
    buf
}

// =============================================================================
// Relay
// =============================================================================

#[tokio::test]
async fn test_serial_to_tcp_preserves_order() {
    let h = Harness::start(MockSerial::new());
    let mut client = h.connect().await;

    for chunk in [&b"one,"[..], b"two,", b"three"] {
        h.mock.push_read(chunk);
    }

    assert_eq!(read_exactly(&mut client, 13).await, b"one,two,three");
    h.stop().await;
}

#[tokio::test]
async fn test_tcp_to_serial_preserves_order() {
    let h = Harness::start(MockSerial::new());
    let mut client = h.connect().await;

    client.write_all(b"AT+GMR\r\n").await.unwrap();
    client.write_all(b"AT+RST\r\n").await.unwrap();

    h.wait_until("serial writes", || h.mock.sent_bytes().len() == 16)
        .await;
    assert_eq!(h.mock.sent_bytes(), b"AT+GMR\r\nAT+RST\r\n");
    h.stop().await;
}

#[tokio::test]
async fn test_large_client_write_split_into_bounded_chunks() {
    let h = Harness::start(MockSerial::new());
    let mut client = h.connect().await;

    let payload: Vec<u8> = (0..200u8).collect();
    client.write_all(&payload).await.unwrap();

    h.wait_until("serial writes", || h.mock.sent_bytes().len() == 200)
        .await;
    assert_eq!(h.mock.sent_bytes(), payload);
    assert!(h.mock.sent().iter().all(|chunk| chunk.len() <= 32));
    h.stop().await;
}

// =============================================================================
// Best-effort delivery
// =============================================================================

#[tokio::test]
async fn test_serial_data_dropped_without_client() {
    let h = Harness::start(MockSerial::new());

    h.mock.push_read(b"nobody");
    h.wait_until("drop", || h.stats.snapshot().serial_dropped_bytes == 6)
        .await;

    let mut client = h.connect().await;
    h.mock.push_read(b"fresh");
    assert_eq!(read_exactly(&mut client, 5).await, b"fresh");
    h.stop().await;
}

#[tokio::test]
async fn test_device_absent_drops_client_data() {
    let mock = MockSerial::new();
    mock.set_when_empty(WhenEmpty::Disconnected);
    let h = Harness::start(mock);

    h.wait_until("port closed", || !h.serial.is_open()).await;

    let mut client = h.connect().await;
    client.write_all(b"into the void").await.unwrap();
    h.wait_until("drop", || h.stats.snapshot().net_dropped_bytes == 13)
        .await;

    assert!(h.mock.sent().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_forwarding_resumes_after_write_timeout() {
    let h = Harness::start(MockSerial::new());
    let mut client = h.connect().await;

    h.mock.set_send_failure(Some(std::io::ErrorKind::TimedOut));
    client.write_all(b"x").await.unwrap();
    h.wait_until("drop", || h.stats.snapshot().net_dropped_bytes == 1)
        .await;
    h.mock.set_send_failure(None);

    // The device never transmits, but its idle reads show it is still there
    h.wait_until("port reopened", || h.serial.is_open()).await;
    client.write_all(b"AB").await.unwrap();
    h.wait_until("forward", || h.mock.sent_bytes() == b"AB").await;
    h.stop().await;
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test]
async fn test_reconnect_no_residual_bytes() {
    let h = Harness::start(MockSerial::new());

    let mut first = h.connect().await;
    first.write_all(b"AB").await.unwrap();
    h.wait_until("AB", || h.mock.sent_bytes() == b"AB").await;
    drop(first);
    h.wait_until("disconnect", || !h.connection.is_connected())
        .await;

    let mut second = h.connect().await;
    second.write_all(b"CD").await.unwrap();
    h.wait_until("CD", || h.mock.sent_bytes().len() == 4).await;

    assert_eq!(h.mock.sent(), vec![b"AB".to_vec(), b"CD".to_vec()]);

    // Serial data now reaches only the second client
    h.mock.push_read(b"hi");
    assert_eq!(read_exactly(&mut second, 2).await, b"hi");
    h.stop().await;
}

#[tokio::test]
async fn test_second_client_refused() {
    let h = Harness::start(MockSerial::new());
    let mut first = h.connect().await;

    let mut second = TcpStream::connect(h.addr).await.unwrap();
    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
        .await
        .expect("second client was left waiting");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(h.stats.snapshot().refused, 1);

    // The first client is unaffected
    h.mock.push_read(b"still here");
    assert_eq!(read_exactly(&mut first, 10).await, b"still here");
    h.stop().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let h = Harness::start(MockSerial::new());
    let _client = h.connect().await;

    assert!(h.shutdown.trigger());
    assert!(!h.shutdown.trigger());
    assert!(!h.shutdown.trigger());

    // stop() triggers once more and checks the device closed exactly once
    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_while_idle() {
    let h = Harness::start(MockSerial::new());
    h.stop().await;
}

#[tokio::test]
async fn test_client_sees_close_on_shutdown() {
    let h = Harness::start(MockSerial::new());
    let mut client = h.connect().await;

    let shutdown = h.shutdown.clone();
    let stop = tokio::spawn(h.stop());
    shutdown.trigger();

    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("client not closed on shutdown");
    assert!(matches!(read, Ok(0) | Err(_)));
    stop.await.unwrap();
}

// =============================================================================
// Startup failures
// =============================================================================

#[tokio::test]
async fn test_serial_open_failure_is_fatal() {
    let result = Bridge::start(&test_config(), &MockDriver::failing(), Shutdown::new());
    assert!(matches!(result, Err(BridgeError::SerialOpen { .. })));
}

#[tokio::test]
async fn test_invalid_config_is_fatal() {
    let mut config = test_config();
    config.bridge.serial_buffer_size = 0;
    let mock = MockSerial::new();

    let result = Bridge::start(&config, &MockDriver::new(mock.clone()), Shutdown::new());
    assert!(matches!(result, Err(BridgeError::ConfigValidation { .. })));
    assert_eq!(mock.close_count(), 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_bind_failure_closes_serial() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.socket.port = taken.local_addr().unwrap().port();
    let mock = MockSerial::new();

    let result = Bridge::start(&config, &MockDriver::new(mock.clone()), Shutdown::new());
    assert!(matches!(result, Err(BridgeError::TcpBind { .. })));
    assert_eq!(mock.close_count(), 1);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever the receive boundaries, the client sees the concatenation
    #[test]
    fn prop_serial_chunks_arrive_in_order(
        chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..120), 1..8)
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let received = rt.block_on(async {
            let h = Harness::start(MockSerial::new());
            let mut client = h.connect().await;

            let expected_len: usize = chunks.iter().map(Vec::len).sum();
            for chunk in &chunks {
                h.mock.push_read(chunk);
            }
            let received = read_exactly(&mut client, expected_len).await;
            h.stop().await;
            received
        });

        prop_assert_eq!(received, chunks.concat());
    }
}
