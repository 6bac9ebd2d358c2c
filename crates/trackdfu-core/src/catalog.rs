//! Firmware version catalog.
//!
//! Per-model lists of released firmware packages. `notes` holds a message
//! key for the front-end's translation catalog, not display text.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Path prefix of every built-in package.
pub const URL_PREFIX: &str = "/firmware";

/// Notes key for releases without published notes.
pub const UNKNOWN_NOTES: &str = "firmware.versions.unknown";

/// Tracker product line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    #[serde(rename = "HaritoraX 2")]
    HaritoraX2,
    #[serde(rename = "HaritoraX Wireless")]
    HaritoraXWireless,
}

impl DeviceModel {
    pub const ALL: [DeviceModel; 2] = [DeviceModel::HaritoraX2, DeviceModel::HaritoraXWireless];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceModel::HaritoraX2 => "HaritoraX 2",
            DeviceModel::HaritoraXWireless => "HaritoraX Wireless",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "haritorax2" | "x2" => Ok(DeviceModel::HaritoraX2),
            "haritoraxwireless" | "haritoraxw" | "wireless" => Ok(DeviceModel::HaritoraXWireless),
            _ => Err(format!("unknown device model: {}", s)),
        }
    }
}

/// One released firmware package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub version: String,
    /// Release date, ISO 8601.
    pub date: String,
    /// Package location, usually relative to the firmware host.
    pub filename: String,
    pub notes: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub untested: bool,
}

impl FirmwareVersion {
    fn builtin(version: &str, date: &str, path: &str, notes: &str) -> Self {
        Self {
            version: version.to_string(),
            date: date.to_string(),
            filename: format!("{}/{}", URL_PREFIX, path),
            notes: notes.to_string(),
            untested: false,
        }
    }

    /// Parsed release date, if `date` is a valid ISO 8601 date.
    pub fn release_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }

    pub fn is_sem_version(&self) -> bool {
        is_sem_version(&self.version)
    }
}

/// Whether `version` looks like `1.0.21`.
pub fn is_sem_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

const HARITORAX2: &[(&str, &str, &str, &str)] = &[
    ("1.0.1", "2024-12-11", "mc4seb/mc4seb-2-095fdce.zip", UNKNOWN_NOTES),
    ("1.0.3", "2024-12-17", "mc4seb/mc4seb-2-ce48200.zip", UNKNOWN_NOTES),
    ("1.0.7", "2025-01-08", "mc4seb/mc4seb-2-c796754.zip", UNKNOWN_NOTES),
    ("1.0.10", "2025-01-21", "mc4seb/mc4seb-2-9648bfd.zip", UNKNOWN_NOTES),
    ("1.0.14", "2025-01-23", "mc4seb/mc4seb-2-b9b09e9.zip", "firmware.versions.mc4seb.1.0.14"),
    ("1.0.15", "2025-01-30", "mc4seb/mc4seb-2-b645dee.zip", "firmware.versions.mc4seb.1.0.15"),
    ("1.0.19", "2025-02-27", "mc4seb/mc4seb-2-a85a6e5.zip", UNKNOWN_NOTES),
    ("1.0.21", "2025-03-24", "mc4seb/mc4seb-2-c4d6efb.zip", UNKNOWN_NOTES),
    ("1.0.24", "2025-05-12", "mc4seb/mc4seb-2-b475ca6.zip", "firmware.versions.mc4seb.1.0.24"),
    ("1.0.25", "2025-05-19", "mc4seb/mc4seb-2-3a1129c.zip", "firmware.versions.mc4seb.1.0.25"),
    ("1.0.27", "2025-06-30", "mc4seb/mc4seb-2-ab87abb.zip", "firmware.versions.mc4seb.1.0.27"),
];

const HARITORAX_WIRELESS: &[(&str, &str, &str, &str)] = &[
    ("1.0.22", "2023-11-30", "mc3s/mc3_sensor_20231117_e53a9ce.zip", "firmware.versions.mc3s.1.0.22"),
    ("1.0.25", "2024-07-28", "mc3s/mc3_sensor_20240613_e1dd725.zip", "firmware.versions.mc3s.1.0.25"),
    ("1.0.26", "2024-08-01", "mc3s/mc3_sensor_20240801_ea3497b.zip", UNKNOWN_NOTES),
    ("1.0.27", "2025-01-20", "mc3s/mc3_sensor_mc3_bootloader_20250120_68aced4.zip", UNKNOWN_NOTES),
    ("1.0.28", "2025-06-03", "mc3s/mc3_sensor_20250430_5398332.zip", "firmware.versions.mc3s.1.0.28"),
];

/// Firmware versions per device model, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    versions: BTreeMap<DeviceModel, Vec<FirmwareVersion>>,
}

impl Catalog {
    /// Releases known at build time.
    pub fn builtin() -> Self {
        let table = |rows: &[(&str, &str, &str, &str)]| {
            rows.iter()
                .map(|(version, date, path, notes)| {
                    FirmwareVersion::builtin(version, date, path, notes)
                })
                .collect::<Vec<_>>()
        };

        let mut versions = BTreeMap::new();
        versions.insert(DeviceModel::HaritoraX2, table(HARITORAX2));
        versions.insert(DeviceModel::HaritoraXWireless, table(HARITORAX_WIRELESS));
        Self { versions }
    }

    /// Parse a catalog keyed by model name, e.g. `{"HaritoraX 2": [...]}`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn insert(&mut self, model: DeviceModel, versions: Vec<FirmwareVersion>) {
        self.versions.insert(model, versions);
    }

    pub fn versions(&self, model: DeviceModel) -> &[FirmwareVersion] {
        self.versions.get(&model).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, model: DeviceModel, version: &str) -> Option<&FirmwareVersion> {
        self.versions(model).iter().find(|v| v.version == version)
    }

    /// Most recently listed release.
    pub fn latest(&self, model: DeviceModel) -> Option<&FirmwareVersion> {
        self.versions(model).last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.versions(DeviceModel::HaritoraX2).len(), 11);
        assert_eq!(catalog.versions(DeviceModel::HaritoraXWireless).len(), 5);

        let latest = catalog.latest(DeviceModel::HaritoraX2).unwrap();
        assert_eq!(latest.version, "1.0.27");
        assert_eq!(latest.filename, "/firmware/mc4seb/mc4seb-2-ab87abb.zip");
        assert_eq!(
            latest.release_date(),
            NaiveDate::from_ymd_opt(2025, 6, 30)
        );
    }

    #[test]
    fn test_builtin_dates_are_valid() {
        let catalog = Catalog::builtin();
        for model in DeviceModel::ALL {
            for version in catalog.versions(model) {
                assert!(version.release_date().is_some(), "{}", version.version);
                assert!(version.is_sem_version());
            }
        }
    }

    #[test]
    fn test_find() {
        let catalog = Catalog::builtin();
        let found = catalog.find(DeviceModel::HaritoraXWireless, "1.0.27").unwrap();
        assert!(found.filename.contains("bootloader"));
        assert!(catalog.find(DeviceModel::HaritoraXWireless, "9.9.9").is_none());
    }

    #[test]
    fn test_is_sem_version() {
        assert!(is_sem_version("1.0.1"));
        assert!(is_sem_version("1.0.21"));
        assert!(!is_sem_version("1.0"));
        assert!(!is_sem_version("v1.0.1"));
        assert!(!is_sem_version("ab87abb"));
        assert!(!is_sem_version("1..1"));
    }

    #[test]
    fn test_from_json() {
        let catalog = Catalog::from_json(
            r#"{"HaritoraX Wireless": [{"version": "1.0.28", "date": "2025-06-03",
                "filename": "/firmware/x.zip", "notes": "n", "untested": true}]}"#,
        )
        .unwrap();
        let versions = catalog.versions(DeviceModel::HaritoraXWireless);
        assert_eq!(versions.len(), 1);
        assert!(versions[0].untested);
        assert!(catalog.versions(DeviceModel::HaritoraX2).is_empty());
    }

    #[test]
    fn test_model_parsing() {
        assert_eq!("HaritoraX 2".parse(), Ok(DeviceModel::HaritoraX2));
        assert_eq!("haritorax-wireless".parse(), Ok(DeviceModel::HaritoraXWireless));
        assert!("GX6".parse::<DeviceModel>().is_err());
    }
}
