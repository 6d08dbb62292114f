//! Error types for proveskit-bridge.

use std::io;
use thiserror::Error;

/// Result type for proveskit-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for proveskit-bridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, thread spawning).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device link could not be opened at the required line parameters.
    #[error("Failed to open device link {path}: {source}")]
    LinkOpen {
        /// Path that was being opened.
        path: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// The device link has already been closed.
    #[error("Device link is closed")]
    LinkClosed,

    /// No matching device is attached.
    #[error("No PROVESKit device found")]
    DeviceNotFound,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the remote end went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(e) => is_disconnect_kind(e.kind()),
            Self::LinkClosed => true,
            _ => false,
        }
    }

    /// Whether a read or write may simply be retried.
    ///
    /// Any other I/O failure on an open link closes it.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => is_transient_kind(e.kind()),
            _ => false,
        }
    }
}

pub(crate) fn is_transient_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::Interrupted)
}

pub(crate) fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
    )
}
