//! Nordic DFU package (`.zip`) parsing.
//!
//! A package is a zip archive with a top-level `manifest.json`:
//!
//! ```json
//! {"manifest": {"application": {"dat_file": "app.dat", "bin_file": "app.bin"}}}
//! ```
//!
//! Each manifest entry names an init packet (`dat_file`) and a firmware
//! binary (`bin_file`). Base images (softdevice and/or bootloader) go to the
//! device before the application image.

pub mod archive;
pub mod builder;
pub mod manifest;

pub use archive::{DfuImage, FirmwarePackage};
pub use builder::PackageBuilder;
pub use manifest::{
    APP_IMAGE_PRIORITY, BASE_IMAGE_PRIORITY, ImageType, MANIFEST_FILE, Manifest, ManifestEntry,
};

use std::fmt;
use thiserror::Error;

/// Which half of an image a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Init,
    Image,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Init => write!(f, "Init"),
            AssetKind::Image => write!(f, "Image"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PackageError {
    /// The buffer is not a DFU package. Sub-step detail goes to tracing only.
    #[error("Unable to find manifest, is this a proper DFU package?")]
    Format,

    #[error("{kind} file {file} not found in DFU package")]
    MissingAsset { kind: AssetKind, file: String },

    #[error("Manifest entry {image_type} has no {field}")]
    InvalidEntry {
        image_type: ImageType,
        field: &'static str,
    },

    #[error("Failed to read {file} from DFU package: {message}")]
    Corrupt { file: String, message: String },

    #[error("DFU package contains no base or application image")]
    Empty,

    #[error("Failed to write DFU package: {0}")]
    Write(String),
}

impl PackageError {
    /// Name of the missing file, if this is a missing-asset error.
    pub fn missing_file(&self) -> Option<&str> {
        match self {
            PackageError::MissingAsset { file, .. } => Some(file),
            _ => None,
        }
    }
}
