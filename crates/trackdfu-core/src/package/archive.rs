//! Loaded DFU package and the images it yields.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use tracing::{debug, instrument};
use zip::ZipArchive;
use zip::result::ZipError;

use super::manifest::{APP_IMAGE_PRIORITY, BASE_IMAGE_PRIORITY, ImageType, MANIFEST_FILE, Manifest};
use super::{AssetKind, PackageError};

type Archive = ZipArchive<Cursor<Arc<[u8]>>>;

/// One image ready for transfer.
#[derive(Clone, PartialEq, Eq)]
pub struct DfuImage {
    pub image_type: ImageType,
    pub init_file: String,
    pub image_file: String,
    /// Init packet (`.dat`).
    pub init_data: Vec<u8>,
    /// Firmware binary (`.bin`).
    pub image_data: Vec<u8>,
}

impl DfuImage {
    /// Total bytes on the wire for this image.
    pub fn total_len(&self) -> usize {
        self.init_data.len() + self.image_data.len()
    }
}

impl fmt::Debug for DfuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DfuImage")
            .field("image_type", &self.image_type)
            .field("init_file", &self.init_file)
            .field("image_file", &self.image_file)
            .field("init_len", &self.init_data.len())
            .field("image_len", &self.image_data.len())
            .finish()
    }
}

/// A parsed DFU package.
///
/// [`FirmwarePackage::load`] is the only constructor, so every value holds a
/// validated manifest. Images are read from the archive on request.
pub struct FirmwarePackage {
    archive: Archive,
    manifest: Manifest,
}

impl FirmwarePackage {
    /// Decode `buffer` and read its manifest.
    ///
    /// Every failure maps to [`PackageError::Format`]; the cause is only
    /// logged at debug level.
    #[instrument(skip(buffer))]
    pub fn load(buffer: impl Into<Arc<[u8]>>) -> Result<Self, PackageError> {
        let buffer: Arc<[u8]> = buffer.into();
        let len = buffer.len();
        let mut archive = ZipArchive::new(Cursor::new(buffer)).map_err(|e| {
            debug!(len, error = %e, "Not a zip archive");
            PackageError::Format
        })?;

        let text = {
            let mut file = archive.by_name(MANIFEST_FILE).map_err(|e| {
                debug!(error = %e, "No {} in archive", MANIFEST_FILE);
                PackageError::Format
            })?;
            let mut text = String::new();
            file.read_to_string(&mut text).map_err(|e| {
                debug!(error = %e, "Unreadable {}", MANIFEST_FILE);
                PackageError::Format
            })?;
            text
        };

        let manifest = Manifest::from_json(&text).map_err(|e| {
            debug!(error = %e, "Malformed {}", MANIFEST_FILE);
            PackageError::Format
        })?;

        debug!(
            len,
            files = archive.len(),
            images = ?manifest.image_types().collect::<Vec<_>>(),
            "Loaded DFU package"
        );
        Ok(Self { archive, manifest })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Names of all files in the archive.
    pub fn file_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    /// Softdevice and/or bootloader image, if the package carries one.
    pub fn base_image(&self) -> Result<Option<DfuImage>, PackageError> {
        self.image_from(&BASE_IMAGE_PRIORITY)
    }

    /// Application image, if the package carries one.
    pub fn app_image(&self) -> Result<Option<DfuImage>, PackageError> {
        self.image_from(&APP_IMAGE_PRIORITY)
    }

    /// Images in transfer order: base first, then application.
    pub fn images(&self) -> Result<Vec<DfuImage>, PackageError> {
        Ok(self
            .base_image()?
            .into_iter()
            .chain(self.app_image()?)
            .collect())
    }

    /// Whether at least one transferable image is listed.
    pub fn has_images(&self) -> bool {
        self.manifest.first_of(&BASE_IMAGE_PRIORITY).is_some()
            || self.manifest.first_of(&APP_IMAGE_PRIORITY).is_some()
    }

    /// One line per manifest entry, with file sizes.
    pub fn summary(&self) -> Vec<String> {
        self.manifest
            .entries()
            .map(|(ty, entry)| {
                format!(
                    "{}: init {}, image {}",
                    ty,
                    self.describe_file(entry.dat_file.as_deref()),
                    self.describe_file(entry.bin_file.as_deref())
                )
            })
            .collect()
    }

    fn describe_file(&self, name: Option<&str>) -> String {
        let Some(name) = name else {
            return "<unset>".to_string();
        };
        let mut archive = self.archive.clone();
        match archive.by_name(name) {
            Ok(file) => format!("{} ({} bytes)", name, file.size()),
            Err(_) => format!("{} (missing)", name),
        }
    }

    fn image_from(&self, candidates: &[ImageType]) -> Result<Option<DfuImage>, PackageError> {
        let Some((image_type, entry)) = self.manifest.first_of(candidates) else {
            return Ok(None);
        };

        let init_file = entry.dat_file.clone().ok_or(PackageError::InvalidEntry {
            image_type,
            field: "dat_file",
        })?;
        let image_file = entry.bin_file.clone().ok_or(PackageError::InvalidEntry {
            image_type,
            field: "bin_file",
        })?;

        let init_data = self.read_file(&init_file, AssetKind::Init)?;
        let image_data = self.read_file(&image_file, AssetKind::Image)?;

        debug!(
            image_type = %image_type,
            init_len = init_data.len(),
            image_len = image_data.len(),
            "Extracted image"
        );
        Ok(Some(DfuImage {
            image_type,
            init_file,
            image_file,
            init_data,
            image_data,
        }))
    }

    fn read_file(&self, name: &str, kind: AssetKind) -> Result<Vec<u8>, PackageError> {
        let mut archive = self.archive.clone();
        let mut file = archive.by_name(name).map_err(|e| match e {
            ZipError::FileNotFound => PackageError::MissingAsset {
                kind,
                file: name.to_string(),
            },
            other => PackageError::Corrupt {
                file: name.to_string(),
                message: other.to_string(),
            },
        })?;

        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| PackageError::Corrupt {
                file: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(data)
    }
}

impl fmt::Debug for FirmwarePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwarePackage")
            .field("manifest", &self.manifest)
            .field("files", &self.archive.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ManifestEntry, PackageBuilder};

    fn app_only() -> Vec<u8> {
        PackageBuilder::new()
            .image(ImageType::Application, "app.dat", b"init", "app.bin", b"payload")
            .build()
            .unwrap()
    }

    #[test]
    fn test_app_only_package() {
        let package = FirmwarePackage::load(app_only()).unwrap();
        assert!(package.base_image().unwrap().is_none());

        let app = package.app_image().unwrap().unwrap();
        assert_eq!(app.image_type, ImageType::Application);
        assert_eq!(app.init_data, b"init");
        assert_eq!(app.image_data, b"payload");
        assert_eq!(package.images().unwrap().len(), 1);
    }

    #[test]
    fn test_base_before_app() {
        let bytes = PackageBuilder::new()
            .image(ImageType::Application, "app.dat", b"a", "app.bin", b"aa")
            .image(ImageType::SoftdeviceBootloader, "sb.dat", b"s", "sb.bin", b"ss")
            .build()
            .unwrap();
        let package = FirmwarePackage::load(bytes).unwrap();
        let order: Vec<_> = package
            .images()
            .unwrap()
            .into_iter()
            .map(|image| image.image_type)
            .collect();
        assert_eq!(
            order,
            vec![ImageType::SoftdeviceBootloader, ImageType::Application]
        );
    }

    #[test]
    fn test_softdevice_wins_over_bootloader() {
        let bytes = PackageBuilder::new()
            .image(ImageType::Bootloader, "bl.dat", b"b", "bl.bin", b"bb")
            .image(ImageType::Softdevice, "sd.dat", b"s", "sd.bin", b"ss")
            .build()
            .unwrap();
        let package = FirmwarePackage::load(bytes).unwrap();
        let base = package.base_image().unwrap().unwrap();
        assert_eq!(base.image_type, ImageType::Softdevice);
        assert_eq!(base.image_data, b"ss");
    }

    #[test]
    fn test_no_manifest_is_format_error() {
        let bytes = PackageBuilder::new()
            .file("app.bin", b"payload")
            .omit_manifest()
            .build()
            .unwrap();
        assert!(matches!(
            FirmwarePackage::load(bytes),
            Err(PackageError::Format)
        ));
    }

    #[test]
    fn test_garbage_is_format_error() {
        let err = FirmwarePackage::load(b"definitely not a zip".to_vec()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find manifest, is this a proper DFU package?"
        );
    }

    #[test]
    fn test_missing_bin_file() {
        let bytes = PackageBuilder::new()
            .entry(ImageType::Application, ManifestEntry::new("app.dat", "app.bin"))
            .file("app.dat", b"init")
            .build()
            .unwrap();
        let package = FirmwarePackage::load(bytes).unwrap();
        let err = package.app_image().unwrap_err();
        assert_eq!(err.missing_file(), Some("app.bin"));
        assert_eq!(err.to_string(), "Image file app.bin not found in DFU package");
    }

    #[test]
    fn test_missing_dat_file_checked_first() {
        let bytes = PackageBuilder::new()
            .entry(ImageType::Bootloader, ManifestEntry::new("bl.dat", "bl.bin"))
            .build()
            .unwrap();
        let package = FirmwarePackage::load(bytes).unwrap();
        let err = package.base_image().unwrap_err();
        assert_eq!(err.to_string(), "Init file bl.dat not found in DFU package");
    }

    #[test]
    fn test_summary() {
        let package = FirmwarePackage::load(app_only()).unwrap();
        assert_eq!(
            package.summary(),
            vec!["application: init app.dat (4 bytes), image app.bin (7 bytes)".to_string()]
        );
    }
}
