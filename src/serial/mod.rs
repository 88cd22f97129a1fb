//! Serial device access
//!
//! The bridge talks to the device through `SerialDevice`, a blocking
//! send/receive interface. `NativeDriver` backs it with the `serialport`
//! crate; `mock` provides a scriptable in-memory device for tests.
//!
//! `receive` follows the driver contract the bridge relies on:
//! - `Ok(n > 0)`: `n` bytes were read into the front of the buffer
//! - `Ok(0)`: the device is gone (unplugged, closed)
//! - `Err` with an idle kind (see [`is_idle`]): nothing arrived this poll
//! - any other `Err`: I/O failure, treated like a disconnect

pub mod mock;

use crate::config::SerialPortConfig;
use crate::error::{BridgeError, Result};
use serialport::SerialPortType;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Blocking handle to an open serial device
pub trait SerialDevice: Send + 'static {
    /// Write bytes, returning how many were accepted
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Second handle to the same device, so reads and writes can run on
    /// different threads without sharing a lock
    fn try_clone(&self) -> io::Result<Box<dyn SerialDevice>>;

    /// Release the device. Called once, after every other handle is done.
    fn close(&mut self) {}
}

/// Opens serial devices
pub trait SerialDriver {
    /// Open the configured device with the given read timeout
    fn open(
        &self,
        config: &SerialPortConfig,
        read_timeout: Duration,
    ) -> Result<Box<dyn SerialDevice>>;
}

/// True for receive errors that only mean "no data yet"
pub fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Write the whole buffer, retrying partial sends
pub fn send_all(device: &mut dyn SerialDevice, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match device.send(data) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "serial device accepted no bytes",
                ))
            }
            Ok(n) => data = &data[n.min(data.len())..],
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// =============================================================================
// serialport backend
// =============================================================================

/// Driver backed by the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDriver;

impl SerialDriver for NativeDriver {
    fn open(
        &self,
        config: &SerialPortConfig,
        read_timeout: Duration,
    ) -> Result<Box<dyn SerialDevice>> {
        let name = config.port_name();
        let port = serialport::new(&name, config.baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| BridgeError::SerialOpen {
                port: name.clone(),
                source: io::Error::other(e.to_string()),
            })?;

        debug!("Opened {} @ {} baud", name, config.baud_rate);
        Ok(Box::new(NativeSerial { name, port }))
    }
}

struct NativeSerial {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialDevice for NativeSerial {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialDevice>> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Box::new(NativeSerial {
            name: self.name.clone(),
            port,
        }))
    }

    fn close(&mut self) {
        if let Err(e) = self.port.flush() {
            debug!("Flush on close of {} failed: {}", self.name, e);
        }
    }
}

// =============================================================================
// Port listing
// =============================================================================

/// One entry of `list_ports`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    /// USB vendor/product id, when the port is a USB device
    pub usb_id: Option<(u16, u16)>,
    pub product: Option<String>,
}

impl fmt::Display for PortSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((vid, pid)) = self.usb_id {
            write!(f, "  USB {:04x}:{:04x}", vid, pid)?;
        }
        if let Some(product) = &self.product {
            write!(f, "  {}", product)?;
        }
        Ok(())
    }
}

/// Enumerate serial ports visible to the OS
pub fn list_ports() -> Result<Vec<PortSummary>> {
    let ports = serialport::available_ports().map_err(|e| BridgeError::SerialEnumerate {
        source: io::Error::other(e.to_string()),
    })?;

    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => PortSummary {
                name: p.port_name,
                usb_id: Some((usb.vid, usb.pid)),
                product: usb.product,
            },
            _ => PortSummary {
                name: p.port_name,
                usb_id: None,
                product: None,
            },
        })
        .collect())
}
