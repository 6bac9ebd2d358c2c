//! Hardware-free stand-in for a tracker and the firmware host.
//!
//! [`SimulatedTransport`] and [`SimulatedSource`] plug into a regular
//! [`UpdateSession`], so a simulated run raises the same phases, states,
//! log lines and progress shape as a real one. Delays are randomised to
//! mimic BLE latency.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::catalog::{Catalog, DeviceModel, FirmwareVersion};
use crate::config::UpdaterConfig;
use crate::download::{FetchError, PackageSource};
use crate::events::DfuObserver;
use crate::lock_unpoisoned;
use crate::package::{ImageType, PackageBuilder};
use crate::session::UpdateSession;
use crate::transport::{DeviceFilter, DeviceHandle, DfuTransport, TransportError};

/// Nominal firmware size of a simulated flash.
pub const SIMULATED_TOTAL_BYTES: u64 = 339_224;

/// Init packet size of the simulated package.
pub const SIMULATED_INIT_BYTES: usize = 145;

/// Progress ticks of a simulated flash (emitted for 0..=N).
pub const SIMULATED_TICKS: u64 = 20;

/// Advertised name of a simulated tracker in normal mode.
pub fn simulated_device_name(model: DeviceModel) -> &'static str {
    match model {
        DeviceModel::HaritoraX2 => "HaritoraX2-CA7B90",
        DeviceModel::HaritoraXWireless => "HaritoraXW-AF2DM1",
    }
}

/// Advertised name of a simulated tracker in update mode.
pub fn simulated_dfu_device_name(model: DeviceModel) -> &'static str {
    match model {
        DeviceModel::HaritoraX2 => "HaritoraX2-Update",
        DeviceModel::HaritoraXWireless => "HaritoraXW-Update",
    }
}

/// Pick a release other than `current`, uniformly.
///
/// Falls back to the first release when no other exists; `None` only for
/// an empty list.
pub fn random_firmware_version<'a, R: Rng + ?Sized>(
    versions: &'a [FirmwareVersion],
    current: Option<&str>,
    rng: &mut R,
) -> Option<&'a FirmwareVersion> {
    let candidates: Vec<&FirmwareVersion> = versions
        .iter()
        .filter(|v| Some(v.version.as_str()) != current)
        .collect();
    candidates.choose(rng).copied().or_else(|| versions.first())
}

/// Bytes reported at progress tick `tick`.
///
/// The fraction is rounded to a whole percent first, then scaled.
pub fn tick_bytes(tick: u64, total: u64) -> u64 {
    let percent = (tick as f64 / SIMULATED_TICKS as f64 * 100.0).round();
    (percent / 100.0 * total as f64).round() as u64
}

/// Random delay below `max_ms`.
fn jitter(max_ms: f64) -> Duration {
    Duration::from_secs_f64(rand::random::<f64>() * max_ms / 1000.0)
}

async fn log_after(observer: &dyn DfuObserver, delay: Duration, message: &str) {
    tokio::time::sleep(delay).await;
    observer.log(message);
}

async fn log_sequence(observer: &dyn DfuObserver, lines: &[(&str, Duration)]) {
    for (message, delay) in lines {
        log_after(observer, *delay, message).await;
    }
}

const STEP: Duration = Duration::from_millis(50);

/// Simulated tracker.
pub struct SimulatedTransport {
    model: DeviceModel,
    versions: Vec<FirmwareVersion>,
    /// Version to avoid when inventing the installed firmware.
    current: Mutex<Option<String>>,
}

impl SimulatedTransport {
    pub fn new(model: DeviceModel, versions: Vec<FirmwareVersion>, current: Option<String>) -> Self {
        Self {
            model,
            versions,
            current: Mutex::new(current),
        }
    }

    fn device(&self, name: &str) -> DeviceHandle {
        DeviceHandle::new(format!("sim:{}", name), Some(name.to_string()))
    }
}

#[async_trait]
impl DfuTransport for SimulatedTransport {
    async fn request_device(
        &self,
        enter_dfu: bool,
        filter: &DeviceFilter,
        observer: &dyn DfuObserver,
    ) -> Result<Option<DeviceHandle>, TransportError> {
        if enter_dfu {
            let first = jitter(1024.0);
            log_sequence(
                observer,
                &[
                    ("connected to gatt server", first),
                    ("found DFU service", STEP),
                    ("found 1 characteristic(s)", STEP),
                    ("found buttonless characteristic", STEP),
                    ("enabled buttonless notifications", STEP),
                    ("sent DFU mode", Duration::from_millis(200)),
                ],
            )
            .await;
            return Ok(None);
        }

        match filter {
            DeviceFilter::Service(_) => {
                tokio::time::sleep(jitter(1024.0)).await;
                Ok(Some(self.device(simulated_dfu_device_name(self.model))))
            }
            DeviceFilter::NamePrefix(_) => {
                let name = simulated_device_name(self.model);
                log_after(
                    observer,
                    Duration::from_millis(500),
                    &format!("Selected device: {}", name),
                )
                .await;
                Ok(Some(self.device(name)))
            }
        }
    }

    async fn update(
        &self,
        _device: &DeviceHandle,
        init: &[u8],
        _image: &[u8],
        observer: &dyn DfuObserver,
    ) -> Result<(), TransportError> {
        let written_init = format!("written {} bytes", init.len());
        log_sequence(
            observer,
            &[
                ("connected to gatt server", STEP),
                ("found DFU service", STEP),
                ("found 2 characteristic(s)", STEP),
                ("found packet characteristic", STEP),
                ("found control characteristic", STEP),
                ("enabled control notifications", STEP),
                ("transferring init", Duration::from_millis(300)),
                (written_init.as_str(), Duration::from_millis(100)),
                ("transfer complete", Duration::from_millis(100)),
                ("transferring firmware", STEP),
            ],
        )
        .await;

        for tick in 0..=SIMULATED_TICKS {
            tokio::time::sleep(jitter(500.0)).await;
            let current = tick_bytes(tick, SIMULATED_TOTAL_BYTES);
            observer.progress("firmware", current, SIMULATED_TOTAL_BYTES);
            if tick > 0 && tick % 2 == 0 {
                observer.log(&format!("written {} bytes", current));
            }
        }

        log_sequence(
            observer,
            &[
                ("transfer complete", Duration::from_millis(100)),
                ("complete, disconnecting...", STEP),
                ("disconnected", STEP),
            ],
        )
        .await;
        Ok(())
    }

    async fn read_firmware_version(
        &self,
        _device: &DeviceHandle,
        observer: &dyn DfuObserver,
    ) -> Result<String, TransportError> {
        log_sequence(
            observer,
            &[
                ("Connected to GATT server", Duration::from_millis(300)),
                ("Got device_information service", Duration::from_millis(200)),
                (
                    "Got 2a28 (Software Revision String) characteristic",
                    Duration::from_millis(300),
                ),
            ],
        )
        .await;

        let picked = {
            let current = lock_unpoisoned(&self.current);
            random_firmware_version(&self.versions, current.as_deref(), &mut rand::thread_rng())
                .cloned()
        };
        let picked = picked.ok_or_else(|| {
            TransportError::Ble(format!("no firmware versions known for {}", self.model))
        })?;

        observer.log(&format!(
            "Firmware version: {} ({})",
            picked.version, picked.date
        ));
        debug!(version = %picked.version, "Simulated firmware version");
        Ok(picked.version)
    }
}

/// Simulated firmware host serving an application-only package for every
/// catalog filename.
pub struct SimulatedSource {
    filenames: Vec<String>,
}

impl SimulatedSource {
    pub fn new(versions: &[FirmwareVersion]) -> Self {
        Self {
            filenames: versions.iter().map(|v| v.filename.clone()).collect(),
        }
    }

    /// Package served for every known filename.
    pub fn package() -> Result<Vec<u8>, FetchError> {
        let init: Vec<u8> = (0..SIMULATED_INIT_BYTES).map(|i| i as u8).collect();
        let image: Vec<u8> = (0..SIMULATED_TOTAL_BYTES as usize)
            .map(|i| (i % 251) as u8)
            .collect();
        PackageBuilder::new()
            .image(ImageType::Application, "app.dat", &init, "app.bin", &image)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[async_trait]
impl PackageSource for SimulatedSource {
    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
        tokio::time::sleep(jitter(500.0)).await;
        if !self.filenames.iter().any(|known| known == filename) {
            return Err(FetchError::Status {
                status: 404,
                reason: "Not Found".to_string(),
            });
        }
        Self::package()
    }
}

/// Update session backed by the simulation.
///
/// `current` is the version the simulated tracker avoids reporting.
pub fn simulated_session(
    model: DeviceModel,
    catalog: &Catalog,
    current: Option<&str>,
    config: &UpdaterConfig,
) -> UpdateSession {
    let versions = catalog.versions(model).to_vec();
    info!(model = %model, versions = versions.len(), "Using simulated tracker");
    let source = SimulatedSource::new(&versions);
    let transport = SimulatedTransport::new(model, versions, current.map(str::to_string));
    UpdateSession::new(Arc::new(transport), Arc::new(source), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DfuProgress;
    use crate::state::UpdateState;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn version(v: &str) -> FirmwareVersion {
        FirmwareVersion {
            version: v.into(),
            date: "2025-01-01".into(),
            filename: format!("/firmware/{}.zip", v),
            notes: String::new(),
            untested: false,
        }
    }

    #[test]
    fn test_random_version_skips_current() {
        let versions = vec![version("1.0.1"), version("1.0.2"), version("1.0.3")];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let picked = random_firmware_version(&versions, Some("1.0.2"), &mut rng).unwrap();
            assert_ne!(picked.version, "1.0.2");
        }
    }

    #[test]
    fn test_random_version_single_entry() {
        let versions = vec![version("1.0.1")];
        let mut rng = StdRng::seed_from_u64(1);
        let picked = random_firmware_version(&versions, Some("1.0.1"), &mut rng).unwrap();
        assert_eq!(picked.version, "1.0.1");
        assert!(random_firmware_version(&[], None, &mut rng).is_none());
    }

    #[test]
    fn test_tick_bytes() {
        assert_eq!(tick_bytes(0, SIMULATED_TOTAL_BYTES), 0);
        assert_eq!(tick_bytes(1, SIMULATED_TOTAL_BYTES), 16_961);
        assert_eq!(tick_bytes(10, SIMULATED_TOTAL_BYTES), 169_612);
        assert_eq!(tick_bytes(20, SIMULATED_TOTAL_BYTES), SIMULATED_TOTAL_BYTES);
    }

    #[test]
    fn test_device_names() {
        assert_eq!(simulated_device_name(DeviceModel::HaritoraX2), "HaritoraX2-CA7B90");
        assert_eq!(
            simulated_dfu_device_name(DeviceModel::HaritoraXWireless),
            "HaritoraXW-Update"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_update() {
        let catalog = Catalog::builtin();
        let config = UpdaterConfig::default();
        let session = simulated_session(DeviceModel::HaritoraX2, &catalog, None, &config);

        let logs = Arc::new(Mutex::new(Vec::<String>::new()));
        let progress = Arc::new(Mutex::new(Vec::<DfuProgress>::new()));
        let states = Arc::new(Mutex::new(Vec::<UpdateState>::new()));
        let sink = logs.clone();
        session.set_log_callback(move |line| sink.lock().unwrap().push(line.to_string()));
        let sink = progress.clone();
        session.set_progress_callback(move |p| sink.lock().unwrap().push(p.clone()));
        let sink = states.clone();
        session.set_state_callback(move |s| sink.lock().unwrap().push(s));

        let latest = catalog.latest(DeviceModel::HaritoraX2).unwrap();
        session.update_firmware(latest).await.unwrap();

        let progress = progress.lock().unwrap();
        assert_eq!(progress.len(), 21);
        assert!(progress
            .windows(2)
            .all(|w| w[0].current_bytes <= w[1].current_bytes));
        assert_eq!(progress.last().unwrap().current_bytes, SIMULATED_TOTAL_BYTES);

        let logs = logs.lock().unwrap();
        assert_eq!(logs.first().map(String::as_str), Some("connected to gatt server"));
        assert!(logs.contains(&"sent DFU mode".to_string()));
        assert!(logs.contains(&"written 145 bytes".to_string()));
        assert_eq!(
            logs.iter().filter(|l| l.starts_with("written ")).count(),
            11
        );
        assert_eq!(logs.last().map(String::as_str), Some("disconnected"));

        assert_eq!(
            *states.lock().unwrap(),
            vec![
                UpdateState::AwaitingModeSwitch,
                UpdateState::Reconnecting,
                UpdateState::AwaitingDeviceSelection,
                UpdateState::Downloading,
                UpdateState::TransferringApp,
                UpdateState::Complete,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_check_version() {
        let catalog = Catalog::builtin();
        let session = simulated_session(
            DeviceModel::HaritoraXWireless,
            &catalog,
            Some("1.0.28"),
            &UpdaterConfig::default(),
        );
        let installed = session
            .check_version(DeviceModel::HaritoraXWireless, &catalog)
            .await
            .unwrap();
        assert_ne!(installed.version, "1.0.28");
        assert_eq!(installed.device.display_name(), "HaritoraXW-AF2DM1");
        assert!(installed.release.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_package_is_404() {
        let source = SimulatedSource::new(&[version("1.0.1")]);
        assert_eq!(
            source.fetch("/firmware/other.zip").await,
            Err(FetchError::Status {
                status: 404,
                reason: "Not Found".into()
            })
        );
    }
}
