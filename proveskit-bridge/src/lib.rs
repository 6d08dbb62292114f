//! # proveskit-bridge
//!
//! Host-side connection manager for PROVESKit flight controllers.
//!
//! The board enumerates as a USB CDC serial device and prints CRLF-terminated
//! text. This crate keeps exactly one link to it open at a time and shares
//! that link between any number of sessions:
//!
//! - Device discovery by USB vendor/product ID or port path pattern
//! - Automatic reconnection: polling never gives up while disconnected
//! - Line-oriented reading with per-session fan-out and a bounded history
//! - Control routing (send a line, enter/exit the REPL) gated on registration
//! - Generation-scoped registrations, so commands never cross a reconnect
//!
//! ## Features
//!
//! - `native` (default): Linux, macOS and Windows serial ports via the
//!   `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::{Arc, mpsc};
//! use proveskit_bridge::{DeviceEvent, Manager, ManagerConfig, SessionCommand};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Manager::start(ManagerConfig::default())?;
//!     let (tx, rx) = mpsc::channel();
//!     let session = manager.attach(Arc::new(tx));
//!
//!     for event in rx {
//!         match event {
//!             DeviceEvent::DeviceConnected { .. } => {
//!                 session.handle(SessionCommand::ConnectDevice { path: None });
//!                 session.handle(SessionCommand::SendCommand { text: "help()".into() });
//!             },
//!             DeviceEvent::TerminalData { line } => println!("{line}"),
//!             other => println!("{other:?}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod event;
pub mod history;
pub mod lines;
pub mod link;
pub mod manager;
pub mod port;
pub mod router;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    device::{detect_ports, discover},
    port::{NativeBackend, NativePort},
};
pub use {
    device::{
        DetectedPort, DeviceCandidate, DeviceFilter, DeviceKind, PROVESKIT_VID, UsbId,
        detect_ports_with, discover_with, filter_candidates, find_device_with,
    },
    error::{Error, Result},
    event::{ConnectionState, DeviceEvent, SessionCommand},
    history::{DEFAULT_HISTORY_CAPACITY, LineHistory},
    lines::{LineSplitter, clean_line},
    link::{DeviceLink, Lines},
    manager::{DEFAULT_POLL_INTERVAL, Manager, ManagerConfig, Session},
    port::{
        DEVICE_BAUD_RATE, Port, PortBackend, PortEnumerator, PortInfo, PortOpener, SerialConfig,
    },
    router::DeviceCommand,
    session::{Generation, SessionId, SessionSink},
};
