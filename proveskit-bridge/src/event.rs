//! Messages exchanged with sessions, and the connection state they report.
//!
//! Both enums serialize to flat JSON objects tagged by name, e.g.
//! `{"command":"send-command","text":"ping"}` and
//! `{"event":"device-connected","path":"/dev/ttyACM0","connectedAt":1700000000000}`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::router::DeviceCommand;

/// Commands a session may issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum SessionCommand {
    /// Ask for the current connection state.
    CheckDeviceStatus,
    /// Subscribe to the open device, or ask for `path` to be opened now.
    ConnectDevice {
        /// Port to open when no device is connected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Force the device link closed.
    DisconnectDevice,
    /// Send one line of text to the device.
    SendCommand {
        /// Line to send, without terminator.
        text: String,
    },
    /// Enter interactive (REPL) mode.
    EnterRepl,
    /// Leave interactive (REPL) mode.
    ExitRepl,
    /// List attached candidate devices.
    ListDevices,
}

impl SessionCommand {
    /// The device write this command maps to, if it is a control command.
    pub fn device_command(&self) -> Option<DeviceCommand> {
        match self {
            Self::SendCommand { text } => Some(DeviceCommand::SendLine(text.clone())),
            Self::EnterRepl => Some(DeviceCommand::EnterInteractiveMode),
            Self::ExitRepl => Some(DeviceCommand::ExitInteractiveMode),
            _ => None,
        }
    }
}

/// Events delivered to sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DeviceEvent {
    /// A device link is open.
    DeviceConnected {
        /// Port path.
        path: String,
        /// Unix epoch milliseconds at which the link opened.
        #[serde(rename = "connectedAt")]
        connected_at: u64,
    },
    /// No device link is open.
    DeviceDisconnected,
    /// Candidate device paths.
    DeviceList {
        /// Port paths, in lexical order.
        paths: Vec<String>,
    },
    /// One line of device output.
    TerminalData {
        /// Line content without the `\r\n` delimiter.
        line: String,
    },
}

/// Connection state of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ConnectionState {
    /// No device link is open.
    #[default]
    Disconnected,
    /// A device link is open.
    Connected {
        /// Port path.
        #[serde(rename = "devicePath")]
        device_path: String,
        /// Unix epoch milliseconds at which the link opened.
        #[serde(rename = "connectedAt")]
        connected_at: u64,
    },
}

impl ConnectionState {
    /// A freshly opened connection on `device_path`.
    pub fn connected_now(device_path: impl Into<String>) -> Self {
        Self::Connected {
            device_path: device_path.into(),
            connected_at: now_millis(),
        }
    }

    /// Whether a device link is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Path of the open device, if any.
    pub fn device_path(&self) -> Option<&str> {
        match self {
            Self::Connected { device_path, .. } => Some(device_path),
            Self::Disconnected => None,
        }
    }

    /// The event that announces this state.
    pub fn to_event(&self) -> DeviceEvent {
        match self {
            Self::Connected {
                device_path,
                connected_at,
            } => DeviceEvent::DeviceConnected {
                path: device_path.clone(),
                connected_at: *connected_at,
            },
            Self::Disconnected => DeviceEvent::DeviceDisconnected,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
