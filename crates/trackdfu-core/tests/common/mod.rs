#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use trackdfu_core::package::{ImageType, PackageBuilder};
use trackdfu_core::{
    DfuProgress, FetchError, FirmwareVersion, PackageSource, UpdateSession, UpdateState,
    UpdaterConfig,
};

/// Everything a session reported through its sinks.
#[derive(Default, Clone)]
pub struct Recorder {
    pub logs: Arc<Mutex<Vec<String>>>,
    pub progress: Arc<Mutex<Vec<DfuProgress>>>,
    pub states: Arc<Mutex<Vec<UpdateState>>>,
}

impl Recorder {
    pub fn attach(session: &UpdateSession) -> Self {
        let recorder = Self::default();
        let logs = recorder.logs.clone();
        session.set_log_callback(move |line| logs.lock().unwrap().push(line.to_string()));
        let progress = recorder.progress.clone();
        session.set_progress_callback(move |p| progress.lock().unwrap().push(p.clone()));
        let states = recorder.states.clone();
        session.set_state_callback(move |s| states.lock().unwrap().push(s));
        recorder
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<DfuProgress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<UpdateState> {
        self.states.lock().unwrap().clone()
    }

    pub fn count_state(&self, state: UpdateState) -> usize {
        self.states().iter().filter(|s| **s == state).count()
    }
}

/// In-memory firmware host.
pub struct MapSource(pub HashMap<String, Vec<u8>>);

impl MapSource {
    pub fn with(filename: &str, bytes: Vec<u8>) -> Self {
        Self(HashMap::from([(filename.to_string(), bytes)]))
    }
}

#[async_trait]
impl PackageSource for MapSource {
    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
        self.0.get(filename).cloned().ok_or(FetchError::Status {
            status: 404,
            reason: "Not Found".to_string(),
        })
    }
}

pub fn config() -> UpdaterConfig {
    UpdaterConfig {
        reconnect_delay_ms: Some(0),
        ..Default::default()
    }
}

pub fn release(filename: &str) -> FirmwareVersion {
    FirmwareVersion {
        version: "1.0.27".to_string(),
        date: "2025-01-20".to_string(),
        filename: filename.to_string(),
        notes: "firmware.versions.unknown".to_string(),
        untested: false,
    }
}

pub const BASE_INIT: &[u8] = b"bootloader init";
pub const APP_INIT: &[u8] = b"application init";

pub fn base_image() -> Vec<u8> {
    (0..3000u32).map(|i| (i % 7) as u8).collect()
}

pub fn app_image() -> Vec<u8> {
    (0..10_000u32).map(|i| (i % 13) as u8).collect()
}

/// Package with a bootloader and an application image.
pub fn base_and_app_package() -> Vec<u8> {
    PackageBuilder::new()
        .image(ImageType::Bootloader, "bl.dat", BASE_INIT, "bl.bin", &base_image())
        .image(ImageType::Application, "app.dat", APP_INIT, "app.bin", &app_image())
        .build()
        .unwrap()
}

pub fn app_only_package() -> Vec<u8> {
    PackageBuilder::new()
        .image(ImageType::Application, "app.dat", APP_INIT, "app.bin", &app_image())
        .build()
        .unwrap()
}
