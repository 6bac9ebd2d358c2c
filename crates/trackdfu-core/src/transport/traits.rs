//! DFU transport layer abstraction.
//!
//! Defines the `DfuTransport` trait the update session drives, allowing
//! different implementations (btleplug, mock, simulation).

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::events::DfuObserver;
use crate::protocol::ProtocolError;

/// CRC-32 function a transport verifies transferred objects with.
pub type CrcFn = fn(&[u8]) -> u32;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bluetooth is not available: {0}")]
    Unavailable(String),

    #[error("No device found matching {filter}")]
    DeviceNotFound { filter: String },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("CRC mismatch at offset {offset}: expected 0x{expected:08X}, got 0x{actual:08X}")]
    CrcMismatch {
        offset: u32,
        expected: u32,
        actual: u32,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Bluetooth error: {0}")]
    Ble(String),
}

/// A device picked by [`DfuTransport::request_device`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Transport-specific identifier.
    pub id: String,
    /// Advertised name, when known.
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Criteria for picking a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Advertised name starts with the prefix.
    NamePrefix(String),
    /// Device advertises the service.
    Service(Uuid),
}

impl DeviceFilter {
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        match self {
            DeviceFilter::NamePrefix(prefix) => {
                name.is_some_and(|name| name.starts_with(prefix.as_str()))
            }
            DeviceFilter::Service(uuid) => services.contains(uuid),
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFilter::NamePrefix(prefix) => write!(f, "name prefix {:?}", prefix),
            DeviceFilter::Service(uuid) => write!(f, "service {}", uuid),
        }
    }
}

/// Abstract DFU transport interface.
///
/// This trait enables:
/// - Production implementation using btleplug
/// - Mock implementation for unit testing
/// - The hardware-free simulation
///
/// Log lines and progress are reported through the observer passed to each
/// call, never buffered by the transport.
#[async_trait]
pub trait DfuTransport: Send + Sync {
    /// Pick a device matching `filter`.
    ///
    /// With `enter_dfu` set the transport also asks the device to reboot
    /// into its bootloader. `Ok(None)` then means the device went away to
    /// do so and has to be selected again; without `enter_dfu` it means
    /// nothing was selected.
    async fn request_device(
        &self,
        enter_dfu: bool,
        filter: &DeviceFilter,
        observer: &dyn DfuObserver,
    ) -> Result<Option<DeviceHandle>, TransportError>;

    /// Transfer one image (init packet, then firmware) and return once the
    /// device has executed both objects.
    async fn update(
        &self,
        device: &DeviceHandle,
        init: &[u8],
        image: &[u8],
        observer: &dyn DfuObserver,
    ) -> Result<(), TransportError>;

    /// Read the firmware revision string from the device.
    async fn read_firmware_version(
        &self,
        device: &DeviceHandle,
        observer: &dyn DfuObserver,
    ) -> Result<String, TransportError>;
}
