//! Translation of session commands into device writes.
//!
//! | Command                 | Bytes written          |
//! |-------------------------|------------------------|
//! | `SendLine(text)`        | `text` `\r\n`          |
//! | `EnterInteractiveMode`  | `0x03` `a` `\r\n`      |
//! | `ExitInteractiveMode`   | `0x04` `a` `\r\n`      |
//!
//! `0x03` (ETX, Ctrl-C) interrupts the running program and drops the board
//! into its REPL; `0x04` (EOT, Ctrl-D) soft-reboots back into normal mode.
//! The trailing `a\r\n` is a placeholder line that wakes the console.

use log::{debug, warn};

use crate::lines::LINE_DELIMITER;
use crate::link::DeviceLink;

/// Control byte that puts the board into its interactive read loop.
pub const ENTER_REPL_BYTE: u8 = 0x03;

/// Control byte that returns the board to normal mode.
pub const EXIT_REPL_BYTE: u8 = 0x04;

/// Line-terminated token written after a mode toggle.
pub const KEEP_ALIVE: &[u8] = b"a\r\n";

/// A control command destined for the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Send one line of text.
    SendLine(String),
    /// Enter interactive (REPL) mode.
    EnterInteractiveMode,
    /// Leave interactive (REPL) mode.
    ExitInteractiveMode,
}

impl DeviceCommand {
    /// The bytes this command writes to the device.
    pub fn encode(&self) -> Vec<u8> {
        let (head, tail): (&[u8], &[u8]) = match self {
            Self::SendLine(text) => (text.as_bytes(), LINE_DELIMITER),
            Self::EnterInteractiveMode => (&[ENTER_REPL_BYTE], KEEP_ALIVE),
            Self::ExitInteractiveMode => (&[EXIT_REPL_BYTE], KEEP_ALIVE),
        };
        let mut bytes = Vec::with_capacity(head.len() + tail.len());
        bytes.extend_from_slice(head);
        bytes.extend_from_slice(tail);
        bytes
    }
}

/// Write `command` to `link` as a single write.
///
/// Best-effort: with no open link the command is dropped, and a failed write
/// is only logged. A failed write other than a timeout also closes the link.
/// Returns whether the command was written.
pub fn route(link: Option<&DeviceLink>, command: &DeviceCommand) -> bool {
    let Some(link) = link else {
        debug!("Dropping {command:?}: no device link");
        return false;
    };

    match link.write(&command.encode()) {
        Ok(()) => true,
        Err(e) if e.is_disconnect() => {
            debug!("Dropping {command:?}: {e}");
            false
        },
        Err(e) if e.is_transient() => {
            warn!("Timed out writing {command:?} to {}: {e}", link.path());
            false
        },
        Err(e) => {
            warn!("Failed to write {command:?} to {}, link closed: {e}", link.path());
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockPort, MockWire};
    use std::sync::Arc;

    fn link_on(wire: &Arc<MockWire>) -> DeviceLink {
        DeviceLink::from_parts(
            "/dev/ttyACM0",
            Box::new(MockPort::new(Arc::clone(wire))),
            Box::new(MockPort::new(Arc::clone(wire))),
        )
    }

    #[test]
    fn test_send_line_encoding() {
        assert_eq!(
            DeviceCommand::SendLine("ping".to_string()).encode(),
            b"ping\r\n"
        );
        assert_eq!(DeviceCommand::SendLine(String::new()).encode(), b"\r\n");
    }

    #[test]
    fn test_repl_toggle_encoding() {
        assert_eq!(
            DeviceCommand::EnterInteractiveMode.encode(),
            b"\x03a\r\n"
        );
        assert_eq!(
            DeviceCommand::ExitInteractiveMode.encode(),
            b"\x04a\r\n"
        );
    }

    #[test]
    fn test_route_without_link_is_dropped() {
        assert!(!route(None, &DeviceCommand::SendLine("ping".to_string())));
    }

    #[test]
    fn test_route_writes_exact_bytes() {
        let wire = MockWire::new("/dev/ttyACM0");
        let link = link_on(&wire);

        assert!(route(Some(&link), &DeviceCommand::EnterInteractiveMode));
        assert!(route(Some(&link), &DeviceCommand::SendLine("print(1)".to_string())));
        assert!(route(Some(&link), &DeviceCommand::ExitInteractiveMode));

        assert_eq!(wire.written(), b"\x03a\r\nprint(1)\r\n\x04a\r\n");
    }

    #[test]
    fn test_route_io_failure_closes_link() {
        let wire = MockWire::new("/dev/ttyACM0");
        let link = link_on(&wire);

        wire.fail_writes(std::io::ErrorKind::Other);
        assert!(!route(Some(&link), &DeviceCommand::EnterInteractiveMode));
        assert!(link.is_closed());
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_route_to_closed_link_writes_nothing() {
        let wire = MockWire::new("/dev/ttyACM0");
        let link = link_on(&wire);
        link.close();

        assert!(!route(Some(&link), &DeviceCommand::SendLine("ping".to_string())));
        assert!(wire.written().is_empty());
    }
}
