//! Port abstraction for serial communication.
//!
//! The MSP layer never touches the `serialport` crate directly. It talks to a
//! [`Port`], which is opened through a [`PortOpener`]. This keeps the codec
//! and the workflow testable against simulated boards.
//!
//! ```text
//! +------------------+
//! |    Connection    |   locking, retries, send_command
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+     +------------------+
//! |   Port Trait     | <-- |   PortOpener     |
//! +--------+---------+     +------------------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// MSP link baud rate.
pub const MSP_BAUD: u32 = 115_200;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: MSP_BAUD,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// MSP link parameters (115200 8N1, no flow control, 1s timeout) for `port_name`.
    pub fn msp(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// An open, byte-oriented serial port.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Open a second handle onto the same device.
    ///
    /// Used to give reads and writes independent handles (and locks).
    fn try_clone_port(&self) -> Result<Box<dyn Port>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf).map_err(crate::error::TransportError::Io)?;
        std::io::Write::flush(self).map_err(crate::error::TransportError::Io)?;
        Ok(())
    }
}

/// Capability to open a port from a configuration.
pub trait PortOpener: Send + Sync {
    /// Open the port described by `config`.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePort};
