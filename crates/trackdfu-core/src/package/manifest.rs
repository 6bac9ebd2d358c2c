//! `manifest.json` model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the manifest inside a package.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Base image keys in probe order; the first one present wins.
pub const BASE_IMAGE_PRIORITY: [ImageType; 3] = [
    ImageType::Softdevice,
    ImageType::Bootloader,
    ImageType::SoftdeviceBootloader,
];

/// Application image keys in probe order.
pub const APP_IMAGE_PRIORITY: [ImageType; 1] = [ImageType::Application];

/// Logical role of an image in a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageType {
    Softdevice,
    Bootloader,
    SoftdeviceBootloader,
    Application,
}

impl ImageType {
    /// Manifest key.
    pub fn key(&self) -> &'static str {
        match self {
            ImageType::Softdevice => "softdevice",
            ImageType::Bootloader => "bootloader",
            ImageType::SoftdeviceBootloader => "softdevice_bootloader",
            ImageType::Application => "application",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "softdevice" => Some(ImageType::Softdevice),
            "bootloader" => Some(ImageType::Bootloader),
            "softdevice_bootloader" => Some(ImageType::SoftdeviceBootloader),
            "application" => Some(ImageType::Application),
            _ => None,
        }
    }

    /// Check if this is a base (softdevice/bootloader) image.
    pub fn is_base(&self) -> bool {
        !matches!(self, ImageType::Application)
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| format!("unknown image type: {}", s))
    }
}

/// File names of one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dat_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_file: Option<String>,
}

impl ManifestEntry {
    pub fn new(dat_file: impl Into<String>, bin_file: impl Into<String>) -> Self {
        Self {
            dat_file: Some(dat_file.into()),
            bin_file: Some(bin_file.into()),
        }
    }
}

/// Parsed `manifest` object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<ImageType, ManifestEntry>,
}

impl Manifest {
    /// Parse the body of `manifest.json`.
    ///
    /// Keys that are not image types (`dfu_version` and friends) are
    /// skipped. An image key whose value is not an object is an error.
    pub fn from_json(text: &str) -> Result<Self, String> {
        let root: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let manifest = root
            .get("manifest")
            .and_then(Value::as_object)
            .ok_or_else(|| "missing \"manifest\" object".to_string())?;

        let mut entries = BTreeMap::new();
        for (key, value) in manifest {
            let Some(image_type) = ImageType::from_key(key) else {
                tracing::trace!(key = %key, "Skipping non-image manifest key");
                continue;
            };
            let entry: ManifestEntry = serde_json::from_value(value.clone())
                .map_err(|e| format!("entry {}: {}", key, e))?;
            entries.insert(image_type, entry);
        }

        Ok(Self { entries })
    }

    /// Serialize back into `manifest.json` form.
    pub fn to_json(&self) -> String {
        let manifest: serde_json::Map<String, Value> = self
            .entries
            .iter()
            .map(|(ty, entry)| {
                (
                    ty.key().to_string(),
                    serde_json::to_value(entry).unwrap_or(Value::Null),
                )
            })
            .collect();
        serde_json::json!({ "manifest": manifest }).to_string()
    }

    pub fn insert(&mut self, image_type: ImageType, entry: ManifestEntry) {
        self.entries.insert(image_type, entry);
    }

    pub fn get(&self, image_type: ImageType) -> Option<&ManifestEntry> {
        self.entries.get(&image_type)
    }

    /// First entry present among `candidates`, in the order given.
    pub fn first_of(&self, candidates: &[ImageType]) -> Option<(ImageType, &ManifestEntry)> {
        candidates
            .iter()
            .find_map(|ty| self.entries.get(ty).map(|entry| (*ty, entry)))
    }

    /// Image types present in the manifest.
    pub fn image_types(&self) -> impl Iterator<Item = ImageType> + '_ {
        self.entries.keys().copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (ImageType, &ManifestEntry)> {
        self.entries.iter().map(|(ty, entry)| (*ty, entry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
