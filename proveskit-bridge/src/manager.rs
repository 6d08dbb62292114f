//! Connection supervisor and session front door.
//!
//! The [`Manager`] owns one supervisor thread, the only writer of the
//! connection state machine:
//!
//! ```text
//!   Idle ──start──▶ Polling ──candidate opened──▶ Connected
//!                     ▲                               │
//!                     └──── link closed (unplug, ─────┘
//!                           I/O error, disconnect)
//! ```
//!
//! While polling, discovery runs every poll interval and never gives up.
//! The wait between polls is a receive on the supervisor's control channel,
//! so shutdown and `connect-device(path)` cut it short.
//!
//! While connected, a reader thread pumps lines from the [`DeviceLink`] to
//! the registered sessions. Connection state, the active link, the session
//! registry and the line history share one lock; each transition together
//! with its registration teardown is a single critical section, and command
//! routing takes the same lock. A command therefore either reaches the link
//! before teardown starts or is dropped.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::device::{DeviceCandidate, DeviceFilter, discover_with, find_device_with};
use crate::error::Result;
use crate::event::{ConnectionState, DeviceEvent, SessionCommand};
use crate::history::{DEFAULT_HISTORY_CAPACITY, LineHistory};
use crate::link::{DeviceLink, Lines};
use crate::port::{PortBackend, SerialConfig};
use crate::router::{self, DeviceCommand};
use crate::session::{Generation, SessionId, SessionRegistry, SessionSink};

/// Default delay between discovery attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Line parameters for opening the device; the port name is ignored.
    pub serial: SerialConfig,
    /// Delay between discovery attempts while disconnected.
    pub poll_interval: Duration,
    /// Which ports count as the board.
    pub filter: DeviceFilter,
    /// Device lines kept in memory.
    pub history_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            filter: DeviceFilter::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

enum Control {
    Connect(String),
    Disconnect(mpsc::Sender<()>),
    LinkClosed(Generation),
    Shutdown,
}

struct Shared {
    state: ConnectionState,
    generation: Generation,
    link: Option<Arc<DeviceLink>>,
    registry: SessionRegistry,
    history: LineHistory,
}

impl Shared {
    /// `Connected → Disconnected`, including registration teardown.
    ///
    /// With `expected` set, only tears down that generation. Returns whether a
    /// transition happened.
    fn teardown(&mut self, expected: Option<Generation>) -> bool {
        let ConnectionState::Connected { device_path, .. } = &self.state else {
            return false;
        };
        if expected.is_some_and(|generation| generation != self.generation) {
            return false;
        }
        let path = device_path.clone();

        if let Some(link) = self.link.take() {
            link.close();
        }
        self.state = ConnectionState::Disconnected;
        let dropped = self
            .registry
            .unregister_all();
        self.registry
            .broadcast(&DeviceEvent::DeviceDisconnected);

        info!("PROVESKit disconnected from {path} ({dropped} session(s) unregistered)");
        true
    }
}

struct Inner {
    shared: Mutex<Shared>,
    control: mpsc::Sender<Control>,
    backend: Arc<dyn PortBackend>,
    filter: DeviceFilter,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn discover(&self) -> Vec<DeviceCandidate> {
        discover_with(self.backend.as_ref(), &self.filter)
    }
}

/// Owns the device connection and hands out [`Session`]s.
///
/// Dropping the manager shuts the supervisor down and closes the link.
pub struct Manager {
    inner: Arc<Inner>,
    supervisor: Option<JoinHandle<()>>,
}

impl Manager {
    /// Start supervising real serial ports.
    #[cfg(feature = "native")]
    pub fn start(config: ManagerConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(crate::port::NativeBackend))
    }

    /// Start supervising the ports provided by `backend`.
    pub fn with_backend(config: ManagerConfig, backend: Arc<dyn PortBackend>) -> Result<Self> {
        let (control_tx, control_rx) = mpsc::channel();
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                generation: Generation::default(),
                link: None,
                registry: SessionRegistry::new(),
                history: LineHistory::with_capacity(config.history_capacity),
            }),
            control: control_tx,
            backend,
            filter: config.filter,
        });

        let supervisor = Supervisor {
            inner: Arc::clone(&inner),
            control: control_rx,
            serial: config.serial,
            poll_interval: config.poll_interval,
            reader: None,
        };
        let handle = thread::Builder::new()
            .name("proveskit-supervisor".to_string())
            .spawn(move || supervisor.run())?;

        Ok(Self {
            inner,
            supervisor: Some(handle),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner
            .lock()
            .state
            .clone()
    }

    /// Recent device lines, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.inner
            .lock()
            .history
            .snapshot()
    }

    /// Candidate devices currently attached.
    pub fn list_devices(&self) -> Vec<DeviceCandidate> {
        self.inner
            .discover()
    }

    /// Number of attached sessions.
    pub fn attached_sessions(&self) -> usize {
        self.inner
            .lock()
            .registry
            .attached_count()
    }

    /// Attach a session that receives its events through `sink`.
    ///
    /// If a device is connected the session is registered right away.
    pub fn attach(&self, sink: Arc<dyn SessionSink>) -> Session {
        let mut shared = self
            .inner
            .lock();
        let id = shared
            .registry
            .attach(sink);
        if shared.state.is_connected() {
            let generation = shared.generation;
            shared
                .registry
                .register(id, generation);
        }
        drop(shared);

        Session {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stop the supervisor and close any open link. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            let _ = self
                .inner
                .control
                .send(Control::Shutdown);
            if handle.join().is_err() {
                warn!("Supervisor thread panicked");
            }
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One external session.
///
/// Commands never fail: anything that cannot be carried out (no device,
/// session not registered, link closing) is dropped.
pub struct Session {
    id: SessionId,
    inner: Arc<Inner>,
}

impl Session {
    /// Registry identifier of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether this session is wired to the currently open link.
    pub fn is_registered(&self) -> bool {
        let shared = self
            .inner
            .lock();
        shared.state.is_connected()
            && shared
                .registry
                .is_registered(self.id, shared.generation)
    }

    /// Stop receiving device lines and routing commands, staying attached.
    ///
    /// Connection events still arrive; `connect-device` registers again.
    pub fn unregister(&self) {
        self.inner
            .lock()
            .registry
            .unregister(self.id);
    }

    /// Handle one inbound command.
    pub fn handle(&self, command: SessionCommand) {
        if let Some(device_command) = command.device_command() {
            self.send(&device_command);
            return;
        }

        match command {
            SessionCommand::CheckDeviceStatus => {
                let mut shared = self
                    .inner
                    .lock();
                let event = shared.state.to_event();
                shared
                    .registry
                    .send_to(self.id, &event);
            },
            SessionCommand::ConnectDevice { path } => self.connect_device(path),
            SessionCommand::DisconnectDevice => self.disconnect_device(),
            SessionCommand::ListDevices => {
                let paths = self
                    .inner
                    .discover()
                    .into_iter()
                    .map(|c| c.path)
                    .collect();
                self.inner
                    .lock()
                    .registry
                    .send_to(self.id, &DeviceEvent::DeviceList { paths });
            },
            SessionCommand::SendCommand { .. } | SessionCommand::EnterRepl | SessionCommand::ExitRepl => {},
        }
    }

    /// Write a control command to the device if this session is registered
    /// on the open link. Returns whether it was written.
    pub fn send(&self, command: &DeviceCommand) -> bool {
        let shared = self
            .inner
            .lock();
        if !shared.state.is_connected()
            || !shared
                .registry
                .is_registered(self.id, shared.generation)
        {
            debug!("Dropping {command:?} from {}: not registered on an open link", self.id);
            return false;
        }
        router::route(shared.link.as_deref(), command)
    }

    fn connect_device(&self, path: Option<String>) {
        let mut shared = self
            .inner
            .lock();
        if shared.state.is_connected() {
            let generation = shared.generation;
            shared
                .registry
                .register(self.id, generation);
            return;
        }
        drop(shared);

        match path {
            Some(path) => {
                debug!("{} requested connection to {path}", self.id);
                let _ = self
                    .inner
                    .control
                    .send(Control::Connect(path));
            },
            None => debug!("{}: no device to connect to", self.id),
        }
    }

    /// Blocks until the supervisor has applied the disconnect.
    fn disconnect_device(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self
            .inner
            .control
            .send(Control::Disconnect(ack_tx))
            .is_ok()
        {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner
            .lock()
            .registry
            .detach(self.id);
    }
}

struct Supervisor {
    inner: Arc<Inner>,
    control: mpsc::Receiver<Control>,
    serial: SerialConfig,
    poll_interval: Duration,
    reader: Option<JoinHandle<()>>,
}

impl Supervisor {
    fn run(mut self) {
        info!("Waiting for PROVESKit device...");
        // Set after a teardown: wait one interval before polling again.
        let mut cool_down = false;

        loop {
            if self.is_connected() {
                match self.control.recv() {
                    Ok(Control::LinkClosed(generation)) => {
                        cool_down = self.disconnect(Some(generation));
                    },
                    Ok(Control::Disconnect(ack)) => {
                        cool_down = self.disconnect(None);
                        let _ = ack.send(());
                    },
                    Ok(Control::Connect(path)) => {
                        debug!("Ignoring connect to {path}: already connected");
                    },
                    Ok(Control::Shutdown) | Err(_) => break,
                }
                continue;
            }

            if !cool_down {
                match find_device_with(self.inner.backend.as_ref(), &self.inner.filter) {
                    Ok(candidate) => {
                        if self.connect(&candidate.path) {
                            continue;
                        }
                    },
                    Err(e) => trace!("{e}"),
                }
            }
            cool_down = false;

            if !self.wait_for_next_poll() {
                break;
            }
        }

        self.disconnect(None);
        debug!("Supervisor stopped");
    }

    /// Sleep one poll interval, serving control messages meanwhile.
    ///
    /// Returns early after an explicit connect attempt, and `false` on shutdown.
    fn wait_for_next_poll(&mut self) -> bool {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self
                .control
                .recv_timeout(remaining)
            {
                Ok(Control::Connect(path)) => {
                    self.connect(&path);
                    return true;
                },
                Ok(Control::Disconnect(ack)) => {
                    let _ = ack.send(());
                },
                // Close notice for a link already torn down.
                Ok(Control::LinkClosed(_)) => {},
                Err(RecvTimeoutError::Timeout) => return true,
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .state
            .is_connected()
    }

    /// `Polling → Connected`. Returns `false` if the port could not be opened.
    fn connect(&mut self, path: &str) -> bool {
        let link = match DeviceLink::open(
            self.inner
                .backend
                .as_ref(),
            &self
                .serial
                .for_port(path),
        ) {
            Ok(link) => link,
            Err(e) => {
                warn!("{e}");
                return false;
            },
        };
        let Some(lines) = link.lines() else {
            return false;
        };
        let link = Arc::new(link);

        let generation = {
            let mut shared = self
                .inner
                .lock();
            let generation = shared
                .generation
                .next();
            shared.generation = generation;

            let control = self
                .inner
                .control
                .clone();
            link.on_closed(move || {
                let _ = control.send(Control::LinkClosed(generation));
            });

            shared.link = Some(Arc::clone(&link));
            shared.state = ConnectionState::connected_now(path);
            let event = shared.state.to_event();
            shared
                .registry
                .broadcast(&event);
            generation
        };
        info!("PROVESKit connected on {path} ({generation})");

        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name(format!("proveskit-reader-{generation}"))
            .spawn(move || pump_lines(&inner, generation, lines))
        {
            Ok(handle) => self.reader = Some(handle),
            Err(e) => {
                warn!("Failed to start reader for {path}: {e}");
                link.close();
            },
        }
        true
    }

    /// `Connected → Polling`. Returns whether a transition happened.
    fn disconnect(&mut self, expected: Option<Generation>) -> bool {
        let torn_down = self
            .inner
            .lock()
            .teardown(expected);
        if torn_down {
            if let Some(reader) = self.reader.take() {
                if reader.join().is_err() {
                    warn!("Reader thread panicked");
                }
            }
        }
        torn_down
    }
}

/// Fan device lines out to the sessions registered on `generation`.
fn pump_lines(inner: &Inner, generation: Generation, lines: Lines) {
    for line in lines {
        let mut shared = inner.lock();
        if shared.generation != generation || !shared.state.is_connected() {
            break;
        }
        trace!("<- {line}");
        shared
            .history
            .push(line.clone());
        shared
            .registry
            .broadcast_registered(generation, &DeviceEvent::TerminalData { line });
    }
    debug!("Reader for {generation} finished");
}
