//! TrackDFU-Core: firmware updates for HaritoraX trackers over Nordic Secure DFU.
//!
//! This crate drives the complete update of a HaritoraX 2 or HaritoraX
//! Wireless tracker: switching it into its bootloader, downloading a
//! release, parsing the DFU package and transferring its images over BLE.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Package**: DFU `.zip` parsing (manifest, base and application images)
//! - **Protocol**: Secure DFU UUIDs, control point opcodes and responses
//! - **Transport**: DFU transport abstraction (btleplug, mock)
//! - **State**: Update state machine and progress bookkeeping
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//! - **Catalog**: Known firmware releases per device model
//! - **Download**: Package fetching over HTTP
//! - **Simulation**: Hardware-free tracker for demos and tests
//!
//! # Example
//!
//! ```no_run
//! use trackdfu_core::catalog::{Catalog, DeviceModel};
//! use trackdfu_core::config::UpdaterConfig;
//! use trackdfu_core::session::UpdateSession;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = UpdaterConfig::default().with_defaults();
//! let session = UpdateSession::bluetooth(&config).await?;
//! session.set_log_callback(|line| println!("{}", line));
//!
//! let catalog = Catalog::builtin();
//! if let Some(latest) = catalog.latest(DeviceModel::HaritoraXWireless) {
//!     session.update_firmware(latest).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod package;
pub mod protocol;
pub mod session;
pub mod simulation;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use catalog::{Catalog, DeviceModel, FirmwareVersion, is_sem_version};
pub use config::{PacketDelay, UpdaterConfig};
pub use download::{FetchError, HttpSource, PackageSource};
pub use error::UpdateError;
pub use events::{DfuEvent, DfuObserver, DfuProgress, NullObserver, TracingObserver, UpdateStatus};
pub use package::{DfuImage, FirmwarePackage, ImageType, PackageError};
pub use session::{InstalledFirmware, ModeSwitch, UpdateSession};
pub use state::UpdateState;
pub use transport::{BleTransport, DeviceFilter, DeviceHandle, DfuTransport, MockTransport, TransportError};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
