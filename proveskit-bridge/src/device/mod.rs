//! Device discovery and classification.
//!
//! A PROVESKit flight controller enumerates as a USB CDC device under the
//! pid.codes vendor `0x1209`. Two product IDs are in the field:
//!
//! - `0x0011`: early V4 boards
//! - `0xE004`: current V4 boards
//!
//! Discovery never fails: an enumeration error is logged and reported as
//! "nothing attached", so the supervisor's retry loop stays uniform.

use std::fmt;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::port::{PortEnumerator, PortInfo};

/// pid.codes vendor ID used by PROVESKit boards.
pub const PROVESKIT_VID: u16 = 0x1209;

/// Known VID/PID pairs of PROVESKit flight controllers.
const KNOWN_USB_DEVICES: &[(u16, u16, DeviceKind)] = &[
    (PROVESKIT_VID, 0x0011, DeviceKind::ProvesKitV4Legacy),
    (PROVESKIT_VID, 0xE004, DeviceKind::ProvesKitV4),
];

/// Board variants recognised by their USB identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Early V4 flight controller (PID `0x0011`).
    ProvesKitV4Legacy,
    /// V4 flight controller (PID `0xE004`).
    ProvesKitV4,
    /// Unknown device.
    Unknown,
}

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, known_pid, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && pid == *known_pid {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProvesKitV4Legacy => "PROVESKit V4 (legacy)",
            Self::ProvesKitV4 => "PROVESKit V4",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// A USB vendor/product pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbId {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbId {
    /// Check if this id matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }

    /// The built-in allow-list.
    pub fn known() -> Vec<Self> {
        KNOWN_USB_DEVICES
            .iter()
            .map(|(vid, pid, _)| Self {
                vid: *vid,
                pid: *pid,
            })
            .collect()
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Which attached ports count as the target board.
#[derive(Debug, Clone)]
pub enum DeviceFilter {
    /// Match on USB vendor/product identifiers.
    UsbIds(Vec<UsbId>),
    /// Match on the port path, e.g. `/dev/ttyACM*`.
    PathPattern(glob::Pattern),
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::UsbIds(UsbId::known())
    }
}

impl DeviceFilter {
    /// Build a path-glob filter.
    pub fn path_pattern(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(Self::PathPattern)
            .map_err(|e| Error::Config(format!("invalid port pattern '{pattern}': {e}")))
    }

    /// Match exactly one port path, with glob metacharacters taken literally.
    pub fn exact_path(path: &str) -> Result<Self> {
        Self::path_pattern(&glob::Pattern::escape(path))
    }

    /// Whether `port` is a candidate under this filter.
    pub fn matches(&self, port: &DetectedPort) -> bool {
        match self {
            Self::UsbIds(ids) => match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => ids.iter().any(|id| id.matches(vid, pid)),
                _ => false,
            },
            Self::PathPattern(pattern) => pattern.matches(&port.name),
        }
    }
}

/// Discovered serial endpoint information.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// A discovered port that matches the board's signature.
///
/// Identifiers are 4-digit lowercase hex, empty when the port is not USB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCandidate {
    /// Port path.
    pub path: String,
    /// USB vendor ID.
    pub vendor_id: String,
    /// USB product ID.
    pub product_id: String,
}

impl From<&DetectedPort> for DeviceCandidate {
    fn from(port: &DetectedPort) -> Self {
        Self {
            path: port
                .name
                .clone(),
            vendor_id: port
                .vid
                .map(|v| format!("{v:04x}"))
                .unwrap_or_default(),
            product_id: port
                .pid
                .map(|p| format!("{p:04x}"))
                .unwrap_or_default(),
        }
    }
}

/// Detect all available endpoints with metadata.
///
/// Enumeration failure yields an empty list.
pub fn detect_ports_with<E: PortEnumerator + ?Sized>(enumerator: &E) -> Vec<DetectedPort> {
    match enumerator.list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let detected = DetectedPort::from(info);
                if let (Some(vid), Some(pid)) = (detected.vid, detected.pid) {
                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        detected.name, vid, pid, detected.device
                    );
                }
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all serial endpoints on this host.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    detect_ports_with(&crate::port::NativeBackend)
}

/// Keep the ports matching `filter`, in lexical path order.
pub fn filter_candidates(ports: &[DetectedPort], filter: &DeviceFilter) -> Vec<DeviceCandidate> {
    let mut candidates: Vec<DeviceCandidate> = ports
        .iter()
        .filter(|p| filter.matches(p))
        .map(DeviceCandidate::from)
        .collect();
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

/// Enumerate and filter in one step.
pub fn discover_with<E: PortEnumerator + ?Sized>(
    enumerator: &E,
    filter: &DeviceFilter,
) -> Vec<DeviceCandidate> {
    filter_candidates(&detect_ports_with(enumerator), filter)
}

/// The port the supervisor would connect to: first candidate in path order.
pub fn find_device_with<E: PortEnumerator + ?Sized>(
    enumerator: &E,
    filter: &DeviceFilter,
) -> Result<DeviceCandidate> {
    discover_with(enumerator, filter)
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound)
}

/// Discover attached PROVESKit boards using the built-in allow-list.
#[cfg(feature = "native")]
pub fn discover() -> Vec<DeviceCandidate> {
    discover_with(&crate::port::NativeBackend, &DeviceFilter::default())
}
