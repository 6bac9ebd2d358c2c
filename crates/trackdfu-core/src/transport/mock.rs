//! Mock DFU transport for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{DeviceFilter, DeviceHandle, DfuTransport, TransportError};
use crate::events::DfuObserver;
use crate::lock_unpoisoned;
use crate::protocol::{ObjectType, SOFTWARE_REVISION_UUID};

/// Scripted result of one `request_device` call.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Device(DeviceHandle),
    /// Transport returns no device.
    NoDevice,
    /// Transport fails with `ConnectFailed`.
    Error(String),
}

/// A captured `request_device` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub enter_dfu: bool,
    pub filter: DeviceFilter,
}

/// A captured `update` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpdate {
    pub device: DeviceHandle,
    pub init: Vec<u8>,
    pub image: Vec<u8>,
}

/// Mock transport for exercising the update session without hardware.
pub struct MockTransport {
    /// Queued device request outcomes.
    outcomes: Arc<Mutex<VecDeque<RequestOutcome>>>,
    /// Captured requests.
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Captured updates.
    updates: Arc<Mutex<Vec<RecordedUpdate>>>,
    /// Queued update failures, consumed one per `update` call.
    update_failures: Arc<Mutex<VecDeque<String>>>,
    firmware_version: Arc<Mutex<Option<String>>>,
    /// Bytes per progress event.
    progress_step: AtomicUsize,
    /// Stop firmware progress one step short of the total.
    truncate_progress: AtomicBool,
    /// Artificial latency of `update`.
    update_delay: Mutex<Option<Duration>>,
    next_id: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            update_failures: Arc::new(Mutex::new(VecDeque::new())),
            firmware_version: Arc::new(Mutex::new(None)),
            progress_step: AtomicUsize::new(4096),
            truncate_progress: AtomicBool::new(false),
            update_delay: Mutex::new(None),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Queue a device to be returned by the next request.
    pub fn queue_device(&self, name: &str) -> DeviceHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let device = DeviceHandle::new(format!("mock-{}", id), Some(name.to_string()));
        self.queue_outcome(RequestOutcome::Device(device.clone()));
        device
    }

    /// Queue an empty request result.
    pub fn queue_no_device(&self) {
        self.queue_outcome(RequestOutcome::NoDevice);
    }

    /// Queue a request failure.
    pub fn queue_request_error(&self, message: &str) {
        self.queue_outcome(RequestOutcome::Error(message.to_string()));
    }

    pub fn queue_outcome(&self, outcome: RequestOutcome) {
        lock_unpoisoned(&self.outcomes).push_back(outcome);
    }

    /// Make the next `update` call fail after its init object.
    pub fn fail_next_update(&self, message: &str) {
        lock_unpoisoned(&self.update_failures).push_back(message.to_string());
    }

    pub fn set_firmware_version(&self, version: &str) {
        *lock_unpoisoned(&self.firmware_version) = Some(version.to_string());
    }

    pub fn set_progress_step(&self, step: usize) {
        self.progress_step.store(step.max(1), Ordering::SeqCst);
    }

    pub fn set_truncate_progress(&self, truncate: bool) {
        self.truncate_progress.store(truncate, Ordering::SeqCst);
    }

    pub fn set_update_delay(&self, delay: Duration) {
        *lock_unpoisoned(&self.update_delay) = Some(delay);
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// Get all captured updates.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        lock_unpoisoned(&self.updates).clone()
    }

    fn emit_object(&self, observer: &dyn DfuObserver, object: ObjectType, data: &[u8]) {
        let total = data.len();
        let step = self.progress_step.load(Ordering::SeqCst);
        let truncate =
            object == ObjectType::Data && self.truncate_progress.load(Ordering::SeqCst);

        observer.log(&format!("transferring {}", object.label()));
        let mut sent = 0;
        while sent < total {
            sent = (sent + step).min(total);
            if truncate && sent == total {
                break;
            }
            observer.progress(object.label(), sent as u64, total as u64);
        }
        observer.log("transfer complete");
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DfuTransport for MockTransport {
    async fn request_device(
        &self,
        enter_dfu: bool,
        filter: &DeviceFilter,
        _observer: &dyn DfuObserver,
    ) -> Result<Option<DeviceHandle>, TransportError> {
        lock_unpoisoned(&self.requests).push(RecordedRequest {
            enter_dfu,
            filter: filter.clone(),
        });

        let outcome = lock_unpoisoned(&self.outcomes).pop_front();
        match outcome {
            Some(RequestOutcome::Device(device)) => Ok(Some(device)),
            Some(RequestOutcome::NoDevice) => Ok(None),
            Some(RequestOutcome::Error(message)) => Err(TransportError::ConnectFailed(message)),
            None => Err(TransportError::DeviceNotFound {
                filter: filter.to_string(),
            }),
        }
    }

    async fn update(
        &self,
        device: &DeviceHandle,
        init: &[u8],
        image: &[u8],
        observer: &dyn DfuObserver,
    ) -> Result<(), TransportError> {
        lock_unpoisoned(&self.updates).push(RecordedUpdate {
            device: device.clone(),
            init: init.to_vec(),
            image: image.to_vec(),
        });

        let delay = *lock_unpoisoned(&self.update_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.emit_object(observer, ObjectType::Command, init);

        let failure = lock_unpoisoned(&self.update_failures).pop_front();
        if let Some(message) = failure {
            return Err(TransportError::WriteFailed(message));
        }

        self.emit_object(observer, ObjectType::Data, image);
        Ok(())
    }

    async fn read_firmware_version(
        &self,
        _device: &DeviceHandle,
        _observer: &dyn DfuObserver,
    ) -> Result<String, TransportError> {
        lock_unpoisoned(&self.firmware_version)
            .clone()
            .ok_or(TransportError::CharacteristicNotFound(SOFTWARE_REVISION_UUID))
    }
}
