//! Configuration file support for proveskit-bridge.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments and environment variables (PROVESKIT_*)
//! 2. `--config PATH`, or the local config file (./proveskit-bridge.toml)
//! 3. Global config file (~/.config/proveskit-bridge/config.toml)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, warn};
use proveskit_bridge::{DeviceFilter, ManagerConfig, SerialConfig, UsbId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local config file name, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "proveskit-bridge.toml";

/// Device discovery and line settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Fixed serial port; disables discovery by USB identifiers.
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Delay between discovery attempts, in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Port path glob, e.g. "/dev/ttyACM*".
    pub path_pattern: Option<String>,
    /// Extra USB identifiers accepted as a board.
    #[serde(default)]
    pub usb_device: Vec<UsbId>,
}

/// Output history settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of device lines kept in memory.
    pub capacity: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device configuration.
    #[serde(default)]
    pub device: DeviceConfig,
    /// History configuration.
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "proveskit-bridge").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.device.port.is_some() {
            self.device.port = other.device.port;
        }
        if other.device.baud.is_some() {
            self.device.baud = other.device.baud;
        }
        if other.device.poll_interval_ms.is_some() {
            self.device.poll_interval_ms = other.device.poll_interval_ms;
        }
        if other.device.path_pattern.is_some() {
            self.device.path_pattern = other.device.path_pattern;
        }
        for id in other.device.usb_device {
            if !self.device.usb_device.contains(&id) {
                self.device.usb_device.push(id);
            }
        }

        if other.history.capacity.is_some() {
            self.history.capacity = other.history.capacity;
        }
    }

    /// Build the port filter.
    ///
    /// A fixed port wins over a path pattern, which wins over USB identifiers.
    /// Configured identifiers extend the built-in allow-list.
    pub fn device_filter(&self, port_override: Option<&str>) -> Result<DeviceFilter> {
        if let Some(port) = port_override.or(self.device.port.as_deref()) {
            return DeviceFilter::exact_path(port).context("invalid port");
        }
        if let Some(pattern) = &self.device.path_pattern {
            return DeviceFilter::path_pattern(pattern).context("invalid [device] path_pattern");
        }

        let mut ids = UsbId::known();
        for id in &self.device.usb_device {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        Ok(DeviceFilter::UsbIds(ids))
    }

    /// Resolve the manager settings, applying command-line overrides.
    pub fn manager_config(
        &self,
        port_override: Option<&str>,
        poll_ms_override: Option<u64>,
    ) -> Result<ManagerConfig> {
        let defaults = ManagerConfig::default();

        let mut serial = SerialConfig::default();
        if let Some(baud) = self.device.baud {
            serial.baud_rate = baud;
        }

        let poll_interval = poll_ms_override
            .or(self.device.poll_interval_ms)
            .map_or(defaults.poll_interval, Duration::from_millis);
        if poll_interval.is_zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }

        Ok(ManagerConfig {
            serial,
            poll_interval,
            filter: self.device_filter(port_override)?,
            history_capacity: self
                .history
                .capacity
                .unwrap_or(defaults.history_capacity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proveskit_bridge::{DEFAULT_POLL_INTERVAL, DEVICE_BAUD_RATE};

    fn id(vid: u16, pid: u16) -> UsbId {
        UsbId { vid, pid }
    }

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device.port.is_none());
        assert!(config.device.baud.is_none());
        assert!(config.device.usb_device.is_empty());
        assert!(config.history.capacity.is_none());
    }

    #[test]
    fn test_default_manager_config() {
        let resolved = Config::default()
            .manager_config(None, None)
            .unwrap();
        assert_eq!(resolved.serial.baud_rate, DEVICE_BAUD_RATE);
        assert_eq!(resolved.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(resolved.history_capacity, 300);
        assert!(matches!(resolved.filter, DeviceFilter::UsbIds(ref ids) if ids.len() == 2));
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.device.baud = Some(9600);

        let mut other = Config::default();
        other.device.baud = Some(115_200);
        other.device.port = Some("/dev/ttyACM1".to_string());
        other.history.capacity = Some(50);

        base.merge(other);

        assert_eq!(base.device.baud, Some(115_200));
        assert_eq!(base.device.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(base.history.capacity, Some(50));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.device.port = Some("/dev/ttyACM0".to_string());
        base.device.poll_interval_ms = Some(250);

        base.merge(Config::default());

        assert_eq!(base.device.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.device.poll_interval_ms, Some(250));
    }

    #[test]
    fn test_config_merge_usb_devices_extend_without_duplicates() {
        let mut base = Config::default();
        base.device.usb_device.push(id(0x2E8A, 0x0005));

        let mut other = Config::default();
        other.device.usb_device.push(id(0x2E8A, 0x0005));
        other.device.usb_device.push(id(0x239A, 0x80F4));

        base.merge(other);
        assert_eq!(base.device.usb_device.len(), 2);
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[device]
baud = 115200
poll_interval_ms = 500
path_pattern = "/dev/ttyACM*"

[[device.usb_device]]
vid = 11914
pid = 5

[history]
capacity = 1000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.baud, Some(115_200));
        assert_eq!(config.device.poll_interval_ms, Some(500));
        assert_eq!(config.device.path_pattern.as_deref(), Some("/dev/ttyACM*"));
        assert_eq!(config.device.usb_device, vec![id(0x2E8A, 0x0005)]);
        assert_eq!(config.history.capacity, Some(1000));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.device.port.is_none());
        assert!(config.device.usb_device.is_empty());
    }

    // ---- Resolution ----

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.device.port = Some("/dev/ttyACM0".to_string());
        config.device.poll_interval_ms = Some(500);

        let resolved = config
            .manager_config(Some("/dev/ttyACM3"), Some(20))
            .unwrap();
        assert_eq!(resolved.poll_interval, Duration::from_millis(20));
        assert!(matches!(
            resolved.filter,
            DeviceFilter::PathPattern(ref p) if p.as_str() == "/dev/ttyACM3"
        ));
    }

    #[test]
    fn test_path_pattern_replaces_usb_filter() {
        let mut config = Config::default();
        config.device.path_pattern = Some("/dev/ttyACM*".to_string());
        assert!(matches!(
            config.device_filter(None).unwrap(),
            DeviceFilter::PathPattern(_)
        ));
    }

    #[test]
    fn test_usb_devices_extend_allow_list() {
        let mut config = Config::default();
        config.device.usb_device.push(id(0x2E8A, 0x0005));
        config.device.usb_device.push(id(0x1209, 0xE004));

        let DeviceFilter::UsbIds(ids) = config.device_filter(None).unwrap() else {
            panic!("expected a USB id filter");
        };
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&id(0x2E8A, 0x0005)));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut config = Config::default();
        config.device.path_pattern = Some("/dev/tty[".to_string());
        assert!(config.manager_config(None, None).is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        assert!(Config::default().manager_config(None, Some(0)).is_err());
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        fs::write(
            &path,
            r#"
[device]
port = "/dev/ttyACM2"
[history]
capacity = 10
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.device.port.as_deref(), Some("/dev/ttyACM2"));
        assert_eq!(config.history.capacity, Some(10));
    }

    #[test]
    fn test_load_from_path_malformed_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "[device\nport = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.device.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.device.port.is_none());
    }

    #[test]
    fn test_global_config_path_names_the_tool() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("proveskit-bridge"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
