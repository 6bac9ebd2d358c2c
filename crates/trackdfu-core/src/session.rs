//! Update Session - High-level orchestrator for the firmware update flow.
//!
//! An [`UpdateSession`] sequences the phases of an update against a
//! [`DfuTransport`] and a [`PackageSource`]:
//!
//! ```text
//! enter update mode -> [reconnect -> select update-mode device]
//!                   -> download package -> base image -> application image
//! ```
//!
//! Each phase is attempted once. A failure aborts the flow, is reported once
//! on the log sink and moves the state to [`UpdateState::Failed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::catalog::{Catalog, DeviceModel, FirmwareVersion};
use crate::config::{PacketDelay, UpdaterConfig};
use crate::download::{HttpSource, PackageSource};
use crate::error::UpdateError;
use crate::events::{DfuEvent, DfuObserver, DfuProgress, UpdateStatus};
use crate::lock_unpoisoned;
use crate::package::{DfuImage, FirmwarePackage, PackageError};
use crate::protocol::DFU_SERVICE_UUID;
use crate::state::{ProgressTracker, StateMachineContext, UpdateState};
use crate::transport::{BleTransport, DeviceFilter, DeviceHandle, DfuTransport};

pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(&DfuProgress) + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(UpdateState) + Send + Sync>;

/// Outcome of the mode switch phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSwitch {
    /// The device was already in update mode and can be flashed directly.
    DeviceFound(DeviceHandle),
    /// The device rebooted into update mode and must be selected again.
    NeedsReselection,
}

/// Firmware running on a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledFirmware {
    pub device: DeviceHandle,
    pub version: String,
    /// Catalog release matching `version`, if any.
    pub release: Option<FirmwareVersion>,
}

impl InstalledFirmware {
    pub fn status(&self) -> UpdateStatus {
        UpdateStatus::GotVersion {
            version: self.version.clone(),
            date: self.release.as_ref().map(|r| r.date.clone()),
        }
    }
}

#[derive(Default)]
struct Listeners {
    log: Option<LogCallback>,
    progress: Option<ProgressCallback>,
    state: Option<StateCallback>,
}

/// Marks a session busy for the lifetime of one flow.
struct FlowGuard<'a> {
    busy: &'a AtomicBool,
}

impl<'a> FlowGuard<'a> {
    fn acquire(busy: &'a AtomicBool) -> Result<Self, UpdateError> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UpdateError::Busy)?;
        Ok(Self { busy })
    }
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Forwards transport events to the session sinks.
struct Relay<'a> {
    session: &'a UpdateSession,
    tracker: Mutex<ProgressTracker>,
}

impl<'a> Relay<'a> {
    fn new(session: &'a UpdateSession) -> Self {
        Self {
            session,
            tracker: Mutex::new(ProgressTracker::new()),
        }
    }

    /// Close the last object at its total if the transport stopped short.
    fn finish(&self) {
        let closing = lock_unpoisoned(&self.tracker).finish();
        if let Some(progress) = closing {
            self.session.emit_progress(&progress);
        }
    }
}

impl DfuObserver for Relay<'_> {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::Log(message) => self.session.emit_log(message),
            DfuEvent::Progress(raw) => {
                let accepted = lock_unpoisoned(&self.tracker).accept(raw);
                if let Some(progress) = accepted {
                    self.session.emit_progress(&progress);
                }
            }
        }
    }
}

/// Update Session - orchestrates the complete update process.
///
/// Sinks are single-slot: setting a callback replaces the previous one
/// (last writer wins). Only one flow runs at a time; a second concurrent
/// call fails with [`UpdateError::Busy`].
pub struct UpdateSession {
    transport: Arc<dyn DfuTransport>,
    source: Arc<dyn PackageSource>,
    name_prefix: String,
    reconnect_delay: Duration,
    packet_delay: PacketDelay,
    listeners: RwLock<Listeners>,
    machine: Mutex<StateMachineContext>,
    busy: AtomicBool,
}

impl UpdateSession {
    /// Create a session. Configuration is read once and frozen.
    pub fn new(
        transport: Arc<dyn DfuTransport>,
        source: Arc<dyn PackageSource>,
        config: &UpdaterConfig,
    ) -> Self {
        Self {
            transport,
            source,
            name_prefix: config.device_name_prefix().to_string(),
            reconnect_delay: config.reconnect_delay(),
            packet_delay: config.packet_delay(),
            listeners: RwLock::new(Listeners::default()),
            machine: Mutex::new(StateMachineContext::new()),
            busy: AtomicBool::new(false),
        }
    }

    /// Session on the local Bluetooth adapter, downloading over HTTP.
    pub async fn bluetooth(config: &UpdaterConfig) -> anyhow::Result<Self> {
        let transport = BleTransport::new(
            crc32fast::hash,
            config.packet_delay().as_duration(),
            config.scan_timeout(),
        )
        .await?;
        let source = HttpSource::new(Some(config.firmware_base_url().to_string()))?;
        Ok(Self::new(Arc::new(transport), Arc::new(source), config))
    }

    pub fn set_log_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners_mut().log = Some(Arc::new(callback));
    }

    pub fn set_progress_callback(&self, callback: impl Fn(&DfuProgress) + Send + Sync + 'static) {
        self.listeners_mut().progress = Some(Arc::new(callback));
    }

    pub fn set_state_callback(&self, callback: impl Fn(UpdateState) + Send + Sync + 'static) {
        self.listeners_mut().state = Some(Arc::new(callback));
    }

    /// Drop all callbacks.
    pub fn clear_callbacks(&self) {
        *self.listeners_mut() = Listeners::default();
    }

    pub fn state(&self) -> UpdateState {
        lock_unpoisoned(&self.machine).state
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn packet_delay(&self) -> PacketDelay {
        self.packet_delay
    }

    /// Read the firmware version of a tracker in normal mode.
    #[instrument(skip(self, catalog))]
    pub async fn check_version(
        &self,
        model: DeviceModel,
        catalog: &Catalog,
    ) -> Result<InstalledFirmware, UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        let relay = Relay::new(self);

        let result = async {
            let filter = DeviceFilter::NamePrefix(self.name_prefix.clone());
            let device = self
                .transport
                .request_device(false, &filter, &relay)
                .await
                .map_err(|e| UpdateError::VersionCheck(e.to_string()))?
                .ok_or(UpdateError::NoDeviceSelected)?;
            info!(device = %device, "Selected device");

            let version = self
                .transport
                .read_firmware_version(&device, &relay)
                .await
                .map_err(|e| UpdateError::VersionCheck(e.to_string()))?;
            let release = catalog.find(model, &version).cloned();
            if release.is_none() {
                warn!(model = %model, version = %version, "Version not in catalog");
            }
            Ok(InstalledFirmware {
                device,
                version,
                release,
            })
        }
        .await;

        if let Err(e) = &result {
            self.emit_log(&format!("Update failed: {}", e));
        }
        result
    }

    /// Ask the tracker to reboot into update mode.
    #[instrument(skip(self))]
    pub async fn enter_update_mode(&self) -> Result<ModeSwitch, UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        self.begin();
        let result = self.mode_switch_phase().await;
        self.settle(result)
    }

    /// Pick the tracker once it advertises the DFU service.
    #[instrument(skip(self))]
    pub async fn select_device(&self) -> Result<DeviceHandle, UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        self.begin();
        let result = self.selection_phase().await;
        self.settle(result)
    }

    /// Fetch the package of a catalog release.
    #[instrument(skip(self, version), fields(version = %version.version))]
    pub async fn download_package(&self, version: &FirmwareVersion) -> Result<Vec<u8>, UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        self.begin();
        let result = self.download_phase(version).await;
        self.settle(result)
    }

    /// Parse `package` and flash it to `device`.
    #[instrument(skip(self, package), fields(device = %device, len = package.len()))]
    pub async fn flash_firmware(
        &self,
        device: &DeviceHandle,
        package: Vec<u8>,
    ) -> Result<(), UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        self.begin();
        let result = async {
            let package = FirmwarePackage::load(package)?;
            self.transfer_phase(device, &package).await
        }
        .await;
        self.settle(result)
    }

    /// Flash an already parsed package to `device`.
    #[instrument(skip(self, package), fields(device = %device))]
    pub async fn flash_package(
        &self,
        device: &DeviceHandle,
        package: &FirmwarePackage,
    ) -> Result<(), UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        self.begin();
        let result = self.transfer_phase(device, package).await;
        self.settle(result)
    }

    /// Run the complete update flow for `version`.
    #[instrument(skip(self, version), fields(version = %version.version))]
    pub async fn update_firmware(&self, version: &FirmwareVersion) -> Result<(), UpdateError> {
        let _guard = FlowGuard::acquire(&self.busy)?;
        lock_unpoisoned(&self.machine).reset();

        let result = async {
            let device = match self.mode_switch_phase().await? {
                ModeSwitch::DeviceFound(device) => device,
                ModeSwitch::NeedsReselection => {
                    info!(delay = ?self.reconnect_delay, "Waiting for device to reboot");
                    tokio::time::sleep(self.reconnect_delay).await;
                    self.selection_phase().await?
                }
            };

            let bytes = self.download_phase(version).await?;
            let package = FirmwarePackage::load(bytes)?;
            self.transfer_phase(&device, &package).await
        }
        .await;

        self.settle(result)
    }

    async fn mode_switch_phase(&self) -> Result<ModeSwitch, UpdateError> {
        self.advance(UpdateState::AwaitingModeSwitch);
        let relay = Relay::new(self);
        let filter = DeviceFilter::NamePrefix(self.name_prefix.clone());

        let outcome = self
            .transport
            .request_device(true, &filter, &relay)
            .await
            .map_err(|e| UpdateError::ModeSwitch(e.to_string()))?;

        match outcome {
            Some(device) => {
                info!(device = %device, "Device already in update mode");
                Ok(ModeSwitch::DeviceFound(device))
            }
            None => {
                info!("Device rebooting into update mode");
                self.advance(UpdateState::Reconnecting);
                Ok(ModeSwitch::NeedsReselection)
            }
        }
    }

    async fn selection_phase(&self) -> Result<DeviceHandle, UpdateError> {
        self.advance(UpdateState::AwaitingDeviceSelection);
        let relay = Relay::new(self);
        let filter = DeviceFilter::Service(DFU_SERVICE_UUID);

        let device = self
            .transport
            .request_device(false, &filter, &relay)
            .await
            .map_err(|e| UpdateError::DeviceSelection(e.to_string()))?
            .ok_or(UpdateError::NoDeviceSelected)?;
        info!(device = %device, "Selected DFU device");
        Ok(device)
    }

    async fn download_phase(&self, version: &FirmwareVersion) -> Result<Vec<u8>, UpdateError> {
        self.advance(UpdateState::Downloading);
        info!(filename = %version.filename, "Downloading firmware");
        let bytes = self.source.fetch(&version.filename).await?;
        Ok(bytes)
    }

    async fn transfer_phase(
        &self,
        device: &DeviceHandle,
        package: &FirmwarePackage,
    ) -> Result<(), UpdateError> {
        if !package.has_images() {
            return Err(PackageError::Empty.into());
        }

        if let Some(base) = package.base_image()? {
            self.advance(UpdateState::TransferringBase);
            self.transfer_image(device, &base).await?;
        }

        if let Some(app) = package.app_image()? {
            self.advance(UpdateState::TransferringApp);
            self.transfer_image(device, &app).await?;
        }

        self.advance(UpdateState::Complete);
        Ok(())
    }

    async fn transfer_image(&self, device: &DeviceHandle, image: &DfuImage) -> Result<(), UpdateError> {
        info!(
            image_type = %image.image_type,
            init_len = image.init_data.len(),
            image_len = image.image_data.len(),
            "Transferring image"
        );
        let relay = Relay::new(self);
        self.transport
            .update(device, &image.init_data, &image.image_data, &relay)
            .await
            .map_err(|e| UpdateError::Transfer(e.to_string()))?;
        relay.finish();

        lock_unpoisoned(&self.machine).images_done += 1;
        Ok(())
    }

    /// Start a new flow if the previous one ended.
    fn begin(&self) {
        let mut machine = lock_unpoisoned(&self.machine);
        if machine.state.is_terminal() {
            machine.reset();
        }
    }

    fn advance(&self, state: UpdateState) {
        let moved = {
            let mut machine = lock_unpoisoned(&self.machine);
            if !machine.state.can_advance_to(state) {
                // Phase re-run by the caller.
                machine.reset();
            }
            machine.goto_state(state)
        };
        if moved {
            self.emit_state(state);
        }
    }

    /// Report a failed flow once and move to `Failed`.
    fn settle<T>(&self, result: Result<T, UpdateError>) -> Result<T, UpdateError> {
        if let Err(e) = &result {
            error!(error = %e, "Update failed");
            self.emit_log(&format!("Update failed: {}", e));
            let moved = lock_unpoisoned(&self.machine).goto_state(UpdateState::Failed);
            if moved {
                self.emit_state(UpdateState::Failed);
            }
        }
        result
    }

    fn listeners_mut(&self) -> std::sync::RwLockWriteGuard<'_, Listeners> {
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn listeners(&self) -> std::sync::RwLockReadGuard<'_, Listeners> {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit_log(&self, message: &str) {
        let callback = self.listeners().log.clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn emit_progress(&self, progress: &DfuProgress) {
        let callback = self.listeners().progress.clone();
        if let Some(callback) = callback {
            callback(progress);
        }
    }

    fn emit_state(&self, state: UpdateState) {
        let callback = self.listeners().state.clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::FetchError;
    use crate::package::{ImageType, PackageBuilder};
    use crate::transport::MockTransport;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MapSource(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl PackageSource for MapSource {
        async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
            self.0.get(filename).cloned().ok_or(FetchError::Status {
                status: 404,
                reason: "Not Found".into(),
            })
        }
    }

    fn release(filename: &str) -> FirmwareVersion {
        FirmwareVersion {
            version: "1.0.28".into(),
            date: "2025-06-03".into(),
            filename: filename.into(),
            notes: String::new(),
            untested: false,
        }
    }

    fn session(mock: Arc<MockTransport>, files: &[(&str, Vec<u8>)]) -> UpdateSession {
        let source = MapSource(
            files
                .iter()
                .map(|(name, bytes)| (name.to_string(), bytes.clone()))
                .collect(),
        );
        let config = UpdaterConfig {
            reconnect_delay_ms: Some(0),
            ..Default::default()
        };
        UpdateSession::new(mock, Arc::new(source), &config)
    }

    #[tokio::test]
    async fn test_mode_switch_outcomes() {
        let mock = Arc::new(MockTransport::new());
        let dfu = mock.queue_device("HaritoraXW-Update");
        mock.queue_no_device();
        let session = session(mock.clone(), &[]);

        assert_eq!(
            session.enter_update_mode().await.unwrap(),
            ModeSwitch::DeviceFound(dfu)
        );
        assert_eq!(
            session.enter_update_mode().await.unwrap(),
            ModeSwitch::NeedsReselection
        );
        assert_eq!(session.state(), UpdateState::Reconnecting);

        let requests = mock.requests();
        assert!(requests.iter().all(|r| r.enter_dfu));
        assert_eq!(
            requests[0].filter,
            DeviceFilter::NamePrefix("HaritoraX".into())
        );
    }

    #[tokio::test]
    async fn test_mode_switch_error_is_wrapped() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_request_error("GATT server unavailable");
        let session = session(mock, &[]);

        let err = session.enter_update_mode().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to set device to update mode: Failed to connect: GATT server unavailable"
        );
        assert_eq!(session.state(), UpdateState::Failed);
    }

    #[tokio::test]
    async fn test_select_without_device() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_no_device();
        let session = session(mock.clone(), &[]);

        assert!(matches!(
            session.select_device().await,
            Err(UpdateError::NoDeviceSelected)
        ));
        assert_eq!(
            mock.requests()[0].filter,
            DeviceFilter::Service(DFU_SERVICE_UUID)
        );
    }

    #[tokio::test]
    async fn test_step_by_step_flow() {
        let package = PackageBuilder::new()
            .image(ImageType::Application, "app.dat", b"init", "app.bin", &[7; 100])
            .build()
            .unwrap();
        let mock = Arc::new(MockTransport::new());
        mock.queue_no_device();
        mock.queue_device("HaritoraX2-Update");
        let session = session(mock.clone(), &[("/firmware/x.zip", package)]);

        assert_eq!(
            session.enter_update_mode().await.unwrap(),
            ModeSwitch::NeedsReselection
        );
        let device = session.select_device().await.unwrap();
        let bytes = session
            .download_package(&release("/firmware/x.zip"))
            .await
            .unwrap();
        session.flash_firmware(&device, bytes).await.unwrap();

        assert_eq!(session.state(), UpdateState::Complete);
        assert_eq!(mock.updates()[0].image, vec![7; 100]);
    }

    #[tokio::test]
    async fn test_empty_package_rejected() {
        let package = PackageBuilder::new().build().unwrap();
        let mock = Arc::new(MockTransport::new());
        let session = session(mock.clone(), &[]);

        let err = session
            .flash_firmware(&DeviceHandle::new("dfu", None), package)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Package(PackageError::Empty)));
        assert!(mock.updates().is_empty());
    }

    #[tokio::test]
    async fn test_last_callback_wins() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_request_error("boom");
        let session = session(mock, &[]);

        let first = Arc::new(Mutex::new(Vec::<String>::new()));
        let second = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = first.clone();
        session.set_log_callback(move |line| sink.lock().unwrap().push(line.to_string()));
        let sink = second.clone();
        session.set_log_callback(move |line| sink.lock().unwrap().push(line.to_string()));

        let _ = session.enter_update_mode().await;
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_check_version() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_device("HaritoraXW-AF2DM1");
        mock.set_firmware_version("1.0.25");
        let session = session(mock, &[]);

        let installed = session
            .check_version(DeviceModel::HaritoraXWireless, &Catalog::builtin())
            .await
            .unwrap();
        assert_eq!(installed.version, "1.0.25");
        assert_eq!(
            installed.status().to_string(),
            "Firmware version: 1.0.25 (2024-07-28)"
        );
        assert_eq!(session.state(), UpdateState::Idle);
    }
}
