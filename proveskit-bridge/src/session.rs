//! Session registry: who receives device output and who may drive the device.
//!
//! Every external session is *attached* for its whole lifetime and receives
//! connection status broadcasts. While a device link is open a session may
//! additionally be *registered*: it then receives `terminal-data` and its
//! control commands are routed to the link.
//!
//! Registrations are stamped with the link [`Generation`] they were made
//! against. A registration for any other generation is void, so a command
//! racing a reconnect can never reach a link it was not wired to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, mpsc};

use log::{debug, trace};

use crate::event::DeviceEvent;

/// Identifier of an attached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Counter identifying one device link lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// The generation after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Where a session's events go.
///
/// Implementations must not block: delivery happens while the manager's
/// state lock is held. Returning `false` means the session is gone and it is
/// detached.
pub trait SessionSink: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: &DeviceEvent) -> bool;
}

impl SessionSink for mpsc::Sender<DeviceEvent> {
    fn deliver(&self, event: &DeviceEvent) -> bool {
        self.send(event.clone())
            .is_ok()
    }
}

struct Attached {
    sink: Arc<dyn SessionSink>,
    registration: Option<Generation>,
}

/// Attached sessions and their registrations.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Attached>,
    next_id: u64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session; it starts unregistered.
    pub fn attach(&mut self, sink: Arc<dyn SessionSink>) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(
            id,
            Attached {
                sink,
                registration: None,
            },
        );
        debug!("{id} attached");
        id
    }

    /// Detach a session entirely. Returns whether it was attached.
    pub fn detach(&mut self, id: SessionId) -> bool {
        let removed = self
            .sessions
            .remove(&id)
            .is_some();
        if removed {
            debug!("{id} detached");
        }
        removed
    }

    /// Register a session against `generation`.
    ///
    /// Returns `false` if the session is not attached.
    pub fn register(&mut self, id: SessionId, generation: Generation) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                if session.registration != Some(generation) {
                    debug!("{id} registered on {generation}");
                }
                session.registration = Some(generation);
                true
            },
            None => false,
        }
    }

    /// Drop a session's registration, keeping it attached.
    pub fn unregister(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.registration = None;
        }
    }

    /// Drop every registration. Returns how many were dropped.
    pub fn unregister_all(&mut self) -> usize {
        let mut dropped = 0;
        for session in self.sessions.values_mut() {
            if session.registration.take().is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Whether `id` is registered against exactly `generation`.
    pub fn is_registered(&self, id: SessionId, generation: Generation) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|s| s.registration == Some(generation))
    }

    /// Whether `id` is attached.
    pub fn is_attached(&self, id: SessionId) -> bool {
        self.sessions
            .contains_key(&id)
    }

    /// Number of attached sessions.
    pub fn attached_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions registered against `generation`.
    pub fn registered_count(&self, generation: Generation) -> usize {
        self.sessions
            .values()
            .filter(|s| s.registration == Some(generation))
            .count()
    }

    /// Send `event` to one session.
    pub fn send_to(&mut self, id: SessionId, event: &DeviceEvent) {
        let delivered = self
            .sessions
            .get(&id)
            .is_none_or(|s| s.sink.deliver(event));
        if !delivered {
            self.detach(id);
        }
    }

    /// Send `event` to every attached session.
    pub fn broadcast(&mut self, event: &DeviceEvent) {
        self.deliver_where(event, |_| true);
    }

    /// Send `event` to every session registered against `generation`.
    pub fn broadcast_registered(&mut self, generation: Generation, event: &DeviceEvent) {
        self.deliver_where(event, |s| s.registration == Some(generation));
    }

    fn deliver_where(&mut self, event: &DeviceEvent, wanted: impl Fn(&Attached) -> bool) {
        let gone: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| wanted(*s))
            .filter(|(_, s)| !s.sink.deliver(event))
            .map(|(id, _)| *id)
            .collect();

        for id in gone {
            trace!("{id} sink closed");
            self.detach(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_session(registry: &mut SessionRegistry) -> (SessionId, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel();
        (registry.attach(Arc::new(tx)), rx)
    }

    fn line(text: &str) -> DeviceEvent {
        DeviceEvent::TerminalData {
            line: text.to_string(),
        }
    }

    #[test]
    fn test_registration_is_generation_scoped() {
        let mut registry = SessionRegistry::new();
        let (id, _rx) = channel_session(&mut registry);
        let first = Generation::default().next();

        assert!(registry.register(id, first));
        assert!(registry.is_registered(id, first));
        assert!(!registry.is_registered(id, first.next()));
    }

    #[test]
    fn test_register_unknown_session_fails() {
        let mut registry = SessionRegistry::new();
        let (id, _rx) = channel_session(&mut registry);
        registry.detach(id);
        assert!(!registry.register(id, Generation::default()));
    }

    #[test]
    fn test_unregister_all_keeps_attachment() {
        let mut registry = SessionRegistry::new();
        let generation = Generation::default().next();
        let (a, _ra) = channel_session(&mut registry);
        let (b, _rb) = channel_session(&mut registry);
        let (_c, _rc) = channel_session(&mut registry);
        registry.register(a, generation);
        registry.register(b, generation);

        assert_eq!(registry.unregister_all(), 2);
        assert_eq!(registry.registered_count(generation), 0);
        assert_eq!(registry.attached_count(), 3);
        assert!(registry.is_attached(a));
    }

    #[test]
    fn test_broadcast_registered_only_reaches_registered() {
        let mut registry = SessionRegistry::new();
        let generation = Generation::default().next();
        let (a, ra) = channel_session(&mut registry);
        let (_b, rb) = channel_session(&mut registry);
        registry.register(a, generation);

        registry.broadcast_registered(generation, &line("L1"));

        assert_eq!(ra.try_recv().unwrap(), line("L1"));
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reaches_everyone_in_order() {
        let mut registry = SessionRegistry::new();
        let (_a, ra) = channel_session(&mut registry);
        let (_b, rb) = channel_session(&mut registry);

        registry.broadcast(&line("L1"));
        registry.broadcast(&line("L2"));

        for rx in [ra, rb] {
            assert_eq!(rx.try_recv().unwrap(), line("L1"));
            assert_eq!(rx.try_recv().unwrap(), line("L2"));
        }
    }

    #[test]
    fn test_dead_sink_is_detached() {
        let mut registry = SessionRegistry::new();
        let (a, ra) = channel_session(&mut registry);
        let (b, _rb) = channel_session(&mut registry);
        drop(ra);

        registry.broadcast(&DeviceEvent::DeviceDisconnected);

        assert!(!registry.is_attached(a));
        assert!(registry.is_attached(b));
    }

    #[test]
    fn test_send_to_targets_one_session() {
        let mut registry = SessionRegistry::new();
        let (a, ra) = channel_session(&mut registry);
        let (_b, rb) = channel_session(&mut registry);

        registry.send_to(a, &DeviceEvent::DeviceDisconnected);

        assert_eq!(ra.try_recv().unwrap(), DeviceEvent::DeviceDisconnected);
        assert!(rb.try_recv().is_err());
    }
}
