//! The open connection to the flight controller.
//!
//! A [`DeviceLink`] owns one serial handle split into two halves:
//!
//! - the writer half, guarded by a mutex, used for control writes
//! - the reader half, handed out once through [`DeviceLink::lines`]
//!
//! Whichever happens first (an explicit [`DeviceLink::close`], a failed
//! write, the reader hitting EOF, or a read error on unplug) fires the link's
//! close hook. It fires exactly once. Only timeouts and interrupted calls
//! leave the link open.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, trace};

use crate::error::{Error, Result, is_disconnect_kind, is_transient_kind};
use crate::lines::LineSplitter;
use crate::port::{Port, PortOpener, SerialConfig};

type CloseHook = Box<dyn FnOnce() + Send>;

/// One-shot close notification shared by both halves of a link.
#[derive(Default)]
struct CloseSignal {
    fired: AtomicBool,
    hook: Mutex<Option<CloseHook>>,
}

impl CloseSignal {
    fn is_fired(&self) -> bool {
        self.fired
            .load(Ordering::SeqCst)
    }

    /// Returns `true` only for the call that actually closed the link.
    fn fire(&self) -> bool {
        if self
            .fired
            .swap(true, Ordering::SeqCst)
        {
            return false;
        }
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
        true
    }

    fn set_hook(&self, hook: CloseHook) {
        let mut slot = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_fired() {
            drop(slot);
            hook();
        } else {
            *slot = Some(hook);
        }
    }
}

/// An open device link.
pub struct DeviceLink {
    path: String,
    writer: Mutex<Option<Box<dyn Port>>>,
    reader: Mutex<Option<Box<dyn Port>>>,
    signal: Arc<CloseSignal>,
}

impl DeviceLink {
    /// Open the port named in `config`.
    ///
    /// Fails with [`Error::LinkOpen`] when the port cannot be opened at the
    /// requested line parameters.
    pub fn open<O: PortOpener + ?Sized>(opener: &O, config: &SerialConfig) -> Result<Self> {
        let link_open = |source: Error| Error::LinkOpen {
            path: config
                .port_name
                .clone(),
            source: Box::new(source),
        };

        let writer = opener
            .open(config)
            .map_err(link_open)?;
        let reader = writer
            .try_clone_port()
            .map_err(link_open)?;

        debug!(
            "Device link open on {} ({} baud)",
            config.port_name, config.baud_rate
        );

        Ok(Self::from_parts(&config.port_name, writer, reader))
    }

    pub(crate) fn from_parts(path: &str, writer: Box<dyn Port>, reader: Box<dyn Port>) -> Self {
        Self {
            path: path.to_string(),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            signal: Arc::new(CloseSignal::default()),
        }
    }

    /// Port path this link is attached to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the link has been closed (explicitly or by the device).
    pub fn is_closed(&self) -> bool {
        self.signal
            .is_fired()
    }

    /// Run `hook` once when the link closes.
    ///
    /// If the link is already closed the hook runs immediately. Only one hook
    /// is kept; a later call replaces an earlier, unfired one.
    pub fn on_closed<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.signal
            .set_hook(Box::new(hook));
    }

    /// Write bytes to the device. No acknowledgement is modeled.
    ///
    /// Any failed write other than a timeout closes the link.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(port) = writer.as_mut() else {
            return Err(Error::LinkClosed);
        };
        if self.is_closed() {
            return Err(Error::LinkClosed);
        }

        trace!("-> {} {:02X?}", self.path, bytes);
        match port.write_all_bytes(bytes) {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                if e.is_disconnect() {
                    debug!("Device on {} went away: {e}", self.path);
                } else {
                    debug!("Write to {} failed: {e}", self.path);
                }
                writer.take();
                drop(writer);
                self.signal
                    .fire();
                Err(e)
            },
        }
    }

    /// Take the inbound line sequence.
    ///
    /// The sequence is not restartable: the first call gets it, later calls
    /// get `None`.
    pub fn lines(&self) -> Option<Lines> {
        let port = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(Lines {
            port,
            path: self
                .path
                .clone(),
            splitter: LineSplitter::new(),
            ready: VecDeque::new(),
            signal: Arc::clone(&self.signal),
        })
    }

    /// Close the link. Idempotent.
    ///
    /// Returns `true` if this call closed it. A blocked [`Lines`] iterator
    /// ends at its next read timeout.
    pub fn close(&self) -> bool {
        let closed = self
            .signal
            .fire();
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if closed {
            debug!("Device link on {} closed", self.path);
        }
        closed
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lazy, infinite sequence of lines read from the device.
///
/// Ends only when the link closes. Ending because of a read error closes the
/// link.
pub struct Lines {
    port: Box<dyn Port>,
    path: String,
    splitter: LineSplitter,
    ready: VecDeque<String>,
    signal: Arc<CloseSignal>,
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut buf = [0u8; 1024];
        loop {
            if self.signal.is_fired() {
                return None;
            }
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }

            match self.port.read(&mut buf) {
                Ok(0) => {
                    debug!("Device on {} closed the port", self.path);
                    self.signal
                        .fire();
                    return None;
                },
                Ok(n) => {
                    self.ready
                        .extend(self.splitter.push(&buf[..n]));
                },
                Err(ref e) if is_transient_kind(e.kind()) => {},
                Err(e) => {
                    if is_disconnect_kind(e.kind()) {
                        debug!("Device on {} went away: {e}", self.path);
                    } else {
                        debug!("Read from {} failed: {e}", self.path);
                    }
                    self.signal
                        .fire();
                    return None;
                },
            }
        }
    }
}
