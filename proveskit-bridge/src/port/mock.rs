//! In-memory serial ports for exercising the link and supervisor.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{Port, PortEnumerator, PortInfo, PortOpener, SerialConfig};

/// Both directions of one simulated cable.
#[derive(Default)]
pub(crate) struct MockWire {
    name: String,
    to_host: Mutex<VecDeque<u8>>,
    from_host: Mutex<Vec<u8>>,
    unplugged: AtomicBool,
    hung_up: AtomicBool,
    write_error: Mutex<Option<io::ErrorKind>>,
    handle_dropped: AtomicBool,
    late_writes: AtomicUsize,
}

impl MockWire {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Bytes the device "prints".
    pub(crate) fn feed(&self, bytes: &[u8]) {
        self.to_host
            .lock()
            .unwrap()
            .extend(bytes);
    }

    /// Everything the host has written so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.from_host
            .lock()
            .unwrap()
            .clone()
    }

    pub(crate) fn unplug(&self) {
        self.unplugged
            .store(true, Ordering::SeqCst);
    }

    /// The far end closes the port: reads drain what is buffered, then hit EOF.
    pub(crate) fn hang_up(&self) {
        self.hung_up
            .store(true, Ordering::SeqCst);
    }

    /// Make every later write fail with `kind`.
    pub(crate) fn fail_writes(&self, kind: io::ErrorKind) {
        *self.write_error.lock().unwrap() = Some(kind);
    }

    /// Writes that landed after the host dropped either handle of this wire.
    pub(crate) fn late_writes(&self) -> usize {
        self.late_writes
            .load(Ordering::SeqCst)
    }
}

pub(crate) struct MockPort {
    wire: Arc<MockWire>,
}

impl MockPort {
    pub(crate) fn new(wire: Arc<MockWire>) -> Self {
        Self { wire }
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.wire.name
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        Ok(Box::new(Self::new(Arc::clone(&self.wire))))
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.wire.unplugged.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let mut pending = self.wire.to_host.lock().unwrap();
        if pending.is_empty() && self.wire.hung_up.load(Ordering::SeqCst) {
            return Ok(0);
        }
        if pending.is_empty() {
            drop(pending);
            std::thread::sleep(Duration::from_millis(2));
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(pending.len());
        for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.wire.unplugged.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        if let Some(kind) = *self.wire.write_error.lock().unwrap() {
            return Err(io::Error::new(kind, "write failed"));
        }
        if self.wire.handle_dropped.load(Ordering::SeqCst) {
            self.wire
                .late_writes
                .fetch_add(1, Ordering::SeqCst);
        }
        self.wire
            .from_host
            .lock()
            .unwrap()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        self.wire
            .handle_dropped
            .store(true, Ordering::SeqCst);
    }
}

/// A fake host: a mutable list of attached ports, each open creating a fresh wire.
#[derive(Default)]
pub(crate) struct MockBackend {
    ports: Mutex<Vec<PortInfo>>,
    opened: Mutex<Vec<Arc<MockWire>>>,
    fail_enumeration: AtomicBool,
    fail_open: AtomicBool,
}

impl MockBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn plug(&self, name: &str, vid: u16, pid: u16) {
        self.ports.lock().unwrap().push(PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            ..Default::default()
        });
    }

    /// Remove the port from enumeration and break its open wire, if any.
    pub(crate) fn unplug(&self, name: &str) {
        self.ports
            .lock()
            .unwrap()
            .retain(|p| p.name != name);
        if let Some(wire) = self.last_wire() {
            if wire.name == name {
                wire.unplug();
            }
        }
    }

    pub(crate) fn set_fail_enumeration(&self, fail: bool) {
        self.fail_enumeration
            .store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.fail_open
            .store(fail, Ordering::SeqCst);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub(crate) fn last_wire(&self) -> Option<Arc<MockWire>> {
        self.opened.lock().unwrap().last().cloned()
    }
}

impl PortEnumerator for MockBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::other("enumeration failed")));
        }
        Ok(self.ports.lock().unwrap().clone())
    }
}

impl PortOpener for MockBackend {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::from(io::ErrorKind::PermissionDenied)));
        }
        let present = self
            .ports
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.name == config.port_name);
        if !present {
            return Err(Error::Io(io::Error::from(io::ErrorKind::NotFound)));
        }
        let wire = MockWire::new(&config.port_name);
        self.opened.lock().unwrap().push(Arc::clone(&wire));
        Ok(Box::new(MockPort::new(wire)))
    }
}
