//! Errors surfaced by an update flow.
//!
//! Each phase wraps the failure underneath it with its own variant; the full
//! flow passes the phase's variant through unchanged.

use thiserror::Error;

use crate::download::FetchError;
use crate::package::PackageError;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("Failed to set device to update mode: {0}")]
    ModeSwitch(String),

    #[error("Failed to select DFU device: {0}")]
    DeviceSelection(String),

    #[error("No DFU device selected")]
    NoDeviceSelected,

    #[error("Failed to read firmware version: {0}")]
    VersionCheck(String),

    #[error("Failed to download firmware: HTTP {status}: {reason}")]
    Download { status: u16, reason: String },

    #[error("Failed to download firmware: {0}")]
    Network(String),

    #[error("Failed to flash firmware: {0}")]
    Transfer(String),

    #[error("An update is already in progress")]
    Busy,
}

impl From<FetchError> for UpdateError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Status { status, reason } => UpdateError::Download { status, reason },
            other => UpdateError::Network(other.to_string()),
        }
    }
}
