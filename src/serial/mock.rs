//! Mock serial device for testing
//!
//! Lets tests script what the bridge reads from the "device" and inspect
//! what it wrote, without hardware. All clones of a `MockSerial` share one
//! state, the same way `try_clone` on a real port shares one device.

use super::{SerialDevice, SerialDriver};
use crate::config::SerialPortConfig;
use crate::error::{BridgeError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// What `receive` returns once the scripted reads run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenEmpty {
    /// No data this poll (read timeout)
    Idle,
    /// Device gone (`Ok(0)`)
    Disconnected,
}

#[derive(Debug)]
enum ScriptedRead {
    Data(Vec<u8>),
    Disconnect,
    Fail(io::ErrorKind),
}

#[derive(Debug)]
struct MockState {
    reads: VecDeque<ScriptedRead>,
    when_empty: WhenEmpty,
    sent: Vec<Vec<u8>>,
    send_limit: Option<usize>,
    send_failure: Option<io::ErrorKind>,
    receive_calls: usize,
    close_count: usize,
}

/// Scriptable in-memory serial device
#[derive(Clone)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                reads: VecDeque::new(),
                when_empty: WhenEmpty::Idle,
                sent: Vec::new(),
                send_limit: None,
                send_failure: None,
                receive_calls: 0,
                close_count: 0,
            })),
        }
    }

    /// Queue bytes for a future `receive`
    pub fn push_read(&self, data: &[u8]) {
        self.state
            .lock()
            .reads
            .push_back(ScriptedRead::Data(data.to_vec()));
    }

    /// Queue an `Ok(0)` read
    pub fn push_disconnect(&self) {
        self.state.lock().reads.push_back(ScriptedRead::Disconnect);
    }

    /// Queue a failing read
    pub fn push_error(&self, kind: io::ErrorKind) {
        self.state.lock().reads.push_back(ScriptedRead::Fail(kind));
    }

    pub fn set_when_empty(&self, when_empty: WhenEmpty) {
        self.state.lock().when_empty = when_empty;
    }

    /// Cap the bytes accepted per `send` call
    pub fn set_send_limit(&self, limit: Option<usize>) {
        self.state.lock().send_limit = limit;
    }

    /// Make every `send` fail with `kind` (None restores normal sends)
    pub fn set_send_failure(&self, kind: Option<io::ErrorKind>) {
        self.state.lock().send_failure = kind;
    }

    /// Scripted reads not yet consumed
    pub fn pending_reads(&self) -> usize {
        self.state.lock().reads.len()
    }

    /// Each accepted `send` call, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// All sent bytes concatenated
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.state.lock().sent.concat()
    }

    pub fn receive_calls(&self) -> usize {
        self.state.lock().receive_calls
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialDevice for MockSerial {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if let Some(kind) = state.send_failure {
            return Err(io::Error::from(kind));
        }
        let n = state.send_limit.map_or(data.len(), |limit| limit.min(data.len()));
        if n > 0 {
            state.sent.push(data[..n].to_vec());
        }
        Ok(n)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.receive_calls += 1;

        match state.reads.pop_front() {
            Some(ScriptedRead::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    state.reads.push_front(ScriptedRead::Data(rest));
                }
                Ok(n)
            }
            Some(ScriptedRead::Disconnect) => Ok(0),
            Some(ScriptedRead::Fail(kind)) => Err(io::Error::from(kind)),
            None => match state.when_empty {
                WhenEmpty::Idle => Err(io::Error::from(io::ErrorKind::TimedOut)),
                WhenEmpty::Disconnected => Ok(0),
            },
        }
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialDevice>> {
        Ok(Box::new(self.clone()))
    }

    fn close(&mut self) {
        self.state.lock().close_count += 1;
    }
}

/// Driver that hands out a shared `MockSerial`, or fails to open
#[derive(Clone, Default)]
pub struct MockDriver {
    device: MockSerial,
    fail_open: bool,
}

impl MockDriver {
    pub fn new(device: MockSerial) -> Self {
        Self {
            device,
            fail_open: false,
        }
    }

    /// Driver whose `open` always fails, as if the device were missing
    pub fn failing() -> Self {
        Self {
            device: MockSerial::new(),
            fail_open: true,
        }
    }
}

impl SerialDriver for MockDriver {
    fn open(
        &self,
        config: &SerialPortConfig,
        _read_timeout: Duration,
    ) -> Result<Box<dyn SerialDevice>> {
        if self.fail_open {
            return Err(BridgeError::SerialOpen {
                port: config.port_name(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(Box::new(self.device.clone()))
    }
}
