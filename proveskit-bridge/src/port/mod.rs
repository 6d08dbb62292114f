//! Port abstraction for serial communication.
//!
//! The device link and the supervisor never talk to the `serialport` crate
//! directly. They go through three small traits:
//!
//! - [`Port`]: an open, byte-oriented handle that can be split into a reader
//!   and a writer half
//! - [`PortEnumerator`]: lists the serial ports currently attached
//! - [`PortOpener`]: opens a [`Port`] from a [`SerialConfig`]
//!
//! ```text
//! +------------------+
//! |    Supervisor    |
//! +--------+---------+
//!          |  PortBackend (enumerate + open)
//!          v
//! +--------+---------+     +------------------+
//! |  NativeBackend   |     |  in-memory ports |
//! |   (serialport)   |     |     (tests)      |
//! +------------------+     +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate the flight controller's USB CDC console runs at.
pub const DEVICE_BAUD_RATE: u32 = 9600;

/// Serial port configuration.
///
/// The board's console is always 8 data bits, no parity, one stop bit and no
/// flow control; only the rate and timeouts vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout. Bounds how long a blocked read takes to notice a close.
    pub timeout: Duration,
    /// Write timeout. A write still blocked after this fails with
    /// [`std::io::ErrorKind::TimedOut`] and the link stays open.
    pub write_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEVICE_BAUD_RATE,
            timeout: Duration::from_millis(50),
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl SerialConfig {
    /// Same line parameters, different port.
    #[must_use]
    pub fn for_port(&self, port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..self.clone()
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone, Default)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// An open serial handle.
///
/// Reads are expected to honour the configured timeout and report it as
/// [`std::io::ErrorKind::TimedOut`], so a reader loop can poll for close.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Create a second handle to the same port for a background read loop.
    fn try_clone_port(&self) -> Result<Box<dyn Port>>;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }
}

/// Lists available serial ports.
pub trait PortEnumerator: Send + Sync {
    /// List all available serial ports.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;
}

/// Opens serial ports.
pub trait PortOpener: Send + Sync {
    /// Open the port named in `config` with its line parameters.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

/// Everything the supervisor needs from the host: enumeration and opening.
pub trait PortBackend: PortEnumerator + PortOpener {}

impl<T: PortEnumerator + PortOpener> PortBackend for T {}

#[cfg(feature = "native")]
pub use native::{NativeBackend, NativePort};
