//! Event system for UI decoupling.
//!
//! Transports raise [`DfuEvent`]s through a [`DfuObserver`] while they work.
//! The update session relays them to its single-slot callbacks, so CLI or GUI
//! front-ends never depend on a concrete transport.

use std::fmt;

/// Progress of one transfer object (`init` or `firmware`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuProgress {
    /// Label of the object being transferred.
    pub object: String,
    /// Bytes acknowledged so far.
    pub current_bytes: u64,
    /// Size of the object; fixed for the whole transfer.
    pub total_bytes: u64,
}

impl DfuProgress {
    pub fn new(object: impl Into<String>, current_bytes: u64, total_bytes: u64) -> Self {
        Self {
            object: object.into(),
            current_bytes,
            total_bytes,
        }
    }

    /// Progress as percentage.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            100
        } else {
            ((self.current_bytes.min(self.total_bytes) * 100) / self.total_bytes) as u8
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_bytes >= self.total_bytes
    }
}

impl fmt::Display for DfuProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} bytes",
            self.current_bytes, self.total_bytes, self.object
        )
    }
}

/// Events emitted by a DFU transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuEvent {
    /// Human-readable protocol log line.
    Log(String),
    /// Transfer progress.
    Progress(DfuProgress),
}

/// Observer trait for receiving DFU events.
pub trait DfuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);

    fn log(&self, message: &str) {
        self.on_event(&DfuEvent::Log(message.to_string()));
    }

    fn progress(&self, object: &str, current_bytes: u64, total_bytes: u64) {
        self.on_event(&DfuEvent::Progress(DfuProgress::new(
            object,
            current_bytes,
            total_bytes,
        )));
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::Log(message) => tracing::info!("DFU Log: {}", message),
            DfuEvent::Progress(progress) => {
                tracing::debug!(
                    object = %progress.object,
                    progress = %format!("{}%", progress.percent()),
                    "DFU Progress: {}",
                    progress
                );
            }
        }
    }
}

/// Status line reported to the user after a phase succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    GotVersion {
        version: String,
        date: Option<String>,
    },
    UpdateModeSet,
    DfuDeviceSelected {
        name: String,
    },
    FirmwareCompleted,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::GotVersion {
                version,
                date: Some(date),
            } => write!(f, "Firmware version: {} ({})", version, date),
            UpdateStatus::GotVersion {
                version,
                date: None,
            } => write!(f, "Firmware version: {}", version),
            UpdateStatus::UpdateModeSet => {
                write!(f, "Device is now in update mode, select it again to continue")
            }
            UpdateStatus::DfuDeviceSelected { name } => write!(f, "Selected DFU device: {}", name),
            UpdateStatus::FirmwareCompleted => write!(f, "Firmware update completed successfully!"),
        }
    }
}
