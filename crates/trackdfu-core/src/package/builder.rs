//! Builds DFU packages in memory.
//!
//! Used by the simulation to serve a plausible package and by tests to
//! craft fixtures, including broken ones.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::PackageError;
use super::manifest::{ImageType, MANIFEST_FILE, Manifest, ManifestEntry};

#[derive(Debug, Default)]
pub struct PackageBuilder {
    manifest: Manifest,
    files: Vec<(String, Vec<u8>)>,
    raw_manifest: Option<String>,
    omit_manifest: bool,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manifest entry together with both of its files.
    pub fn image(
        self,
        image_type: ImageType,
        dat_file: &str,
        init_data: &[u8],
        bin_file: &str,
        image_data: &[u8],
    ) -> Self {
        self.entry(image_type, ManifestEntry::new(dat_file, bin_file))
            .file(dat_file, init_data)
            .file(bin_file, image_data)
    }

    /// Add a manifest entry without adding its files.
    pub fn entry(mut self, image_type: ImageType, entry: ManifestEntry) -> Self {
        self.manifest.insert(image_type, entry);
        self
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.files.push((name.to_string(), data.to_vec()));
        self
    }

    /// Use `text` verbatim as `manifest.json`.
    pub fn raw_manifest(mut self, text: impl Into<String>) -> Self {
        self.raw_manifest = Some(text.into());
        self
    }

    /// Leave `manifest.json` out of the archive.
    pub fn omit_manifest(mut self) -> Self {
        self.omit_manifest = true;
        self
    }

    pub fn build(self) -> Result<Vec<u8>, PackageError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        if !self.omit_manifest {
            let text = self
                .raw_manifest
                .unwrap_or_else(|| self.manifest.to_json());
            zip.start_file(MANIFEST_FILE, options)
                .map_err(write_err)?;
            zip.write_all(text.as_bytes()).map_err(write_err)?;
        }

        for (name, data) in &self.files {
            zip.start_file(name.as_str(), options)
                .map_err(write_err)?;
            zip.write_all(data).map_err(write_err)?;
        }

        let cursor = zip.finish().map_err(write_err)?;
        Ok(cursor.into_inner())
    }
}

fn write_err(e: impl std::fmt::Display) -> PackageError {
    PackageError::Write(e.to_string())
}
