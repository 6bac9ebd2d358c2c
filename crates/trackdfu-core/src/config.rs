//! Updater configuration.
//!
//! Every field is optional so a config file, CLI flags and built-in
//! defaults can be layered: `file.merge(flags).with_defaults()`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::DEVICE_NAME_PREFIX;

pub const DEFAULT_FIRMWARE_BASE_URL: &str = "https://dfu.slimetora.dev";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

/// Pause between packet writes.
///
/// Serialized as an integer: milliseconds, or `-1` to leave pacing to the
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PacketDelay {
    TransportDefault,
    Millis(u64),
}

impl PacketDelay {
    /// Delay to configure a transport with. `None` means back to back.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            PacketDelay::TransportDefault | PacketDelay::Millis(0) => None,
            PacketDelay::Millis(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

impl Default for PacketDelay {
    fn default() -> Self {
        PacketDelay::Millis(1)
    }
}

impl TryFrom<i64> for PacketDelay {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(PacketDelay::TransportDefault),
            ms if ms >= 0 => Ok(PacketDelay::Millis(ms as u64)),
            other => Err(format!(
                "packet delay must be -1 or a number of milliseconds, got {}",
                other
            )),
        }
    }
}

impl From<PacketDelay> for i64 {
    fn from(delay: PacketDelay) -> Self {
        match delay {
            PacketDelay::TransportDefault => -1,
            PacketDelay::Millis(ms) => ms as i64,
        }
    }
}

impl FromStr for PacketDelay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid packet delay: {}", s))?;
        PacketDelay::try_from(value)
    }
}

impl fmt::Display for PacketDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDelay::TransportDefault => write!(f, "transport default"),
            PacketDelay::Millis(ms) => write!(f, "{}ms", ms),
        }
    }
}

/// Configuration for an update session and its transports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Pause between packet writes.
    pub packet_delay: Option<PacketDelay>,
    /// Host that relative firmware paths resolve against.
    pub firmware_base_url: Option<String>,
    /// Pause between the mode switch and selecting the update-mode device.
    pub reconnect_delay_ms: Option<u64>,
    /// BLE scan window.
    pub scan_timeout_secs: Option<u64>,
    /// Advertised name prefix of trackers in normal mode.
    pub device_name_prefix: Option<String>,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UpdaterConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `other` on `self`; set fields in `other` win.
    pub fn merge(self, other: UpdaterConfig) -> Self {
        Self {
            packet_delay: other.packet_delay.or(self.packet_delay),
            firmware_base_url: other.firmware_base_url.or(self.firmware_base_url),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            scan_timeout_secs: other.scan_timeout_secs.or(self.scan_timeout_secs),
            device_name_prefix: other.device_name_prefix.or(self.device_name_prefix),
        }
    }

    /// Fill unset fields with built-in defaults.
    pub fn with_defaults(self) -> Self {
        Self {
            packet_delay: Some(self.packet_delay.unwrap_or_default()),
            firmware_base_url: Some(
                self.firmware_base_url
                    .unwrap_or_else(|| DEFAULT_FIRMWARE_BASE_URL.to_string()),
            ),
            reconnect_delay_ms: Some(
                self.reconnect_delay_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            scan_timeout_secs: Some(self.scan_timeout_secs.unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS)),
            device_name_prefix: Some(
                self.device_name_prefix
                    .unwrap_or_else(|| DEVICE_NAME_PREFIX.to_string()),
            ),
        }
    }

    pub fn packet_delay(&self) -> PacketDelay {
        self.packet_delay.unwrap_or_default()
    }

    pub fn firmware_base_url(&self) -> &str {
        self.firmware_base_url
            .as_deref()
            .unwrap_or(DEFAULT_FIRMWARE_BASE_URL)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(
            self.reconnect_delay_ms
                .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        )
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs.unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS))
    }

    pub fn device_name_prefix(&self) -> &str {
        self.device_name_prefix
            .as_deref()
            .unwrap_or(DEVICE_NAME_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_delay_sentinel() {
        assert_eq!("-1".parse(), Ok(PacketDelay::TransportDefault));
        assert_eq!("15".parse(), Ok(PacketDelay::Millis(15)));
        assert!("-2".parse::<PacketDelay>().is_err());
        assert_eq!(PacketDelay::TransportDefault.as_duration(), None);
        assert_eq!(PacketDelay::Millis(0).as_duration(), None);
        assert_eq!(
            PacketDelay::default().as_duration(),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let file = UpdaterConfig {
            packet_delay: Some(PacketDelay::Millis(5)),
            reconnect_delay_ms: Some(500),
            ..Default::default()
        };
        let flags = UpdaterConfig {
            packet_delay: Some(PacketDelay::TransportDefault),
            ..Default::default()
        };
        let merged = file.merge(flags).with_defaults();
        assert_eq!(merged.packet_delay(), PacketDelay::TransportDefault);
        assert_eq!(merged.reconnect_delay(), Duration::from_millis(500));
        assert_eq!(merged.device_name_prefix(), "HaritoraX");
        assert_eq!(merged.firmware_base_url(), DEFAULT_FIRMWARE_BASE_URL);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackdfu.toml");

        let config = UpdaterConfig {
            packet_delay: Some(PacketDelay::TransportDefault),
            scan_timeout_secs: Some(30),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("packet_delay = -1"));

        let loaded = UpdaterConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file() {
        let config: UpdaterConfig = toml::from_str("packet_delay = 20\n").unwrap();
        assert_eq!(config.packet_delay(), PacketDelay::Millis(20));
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_bad_delay() {
        assert!(toml::from_str::<UpdaterConfig>("packet_delay = -7\n").is_err());
    }
}
