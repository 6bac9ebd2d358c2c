//! Nordic Secure DFU over BLE using btleplug.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::traits::{CrcFn, DeviceFilter, DeviceHandle, DfuTransport, TransportError};
use crate::events::DfuObserver;
use crate::lock_unpoisoned;
use crate::protocol::{
    BUTTONLESS_BONDED_UUID, BUTTONLESS_ENTER_BOOTLOADER, BUTTONLESS_UUID, CONTROL_POINT_UUID,
    ChecksumResponse, ControlResponse, DFU_SERVICE_UUID, ObjectType, PACKET_SIZE, PACKET_UUID,
    PRN_DISABLED, Request, SOFTWARE_REVISION_UUID, SelectResponse, parse_buttonless_response,
};

/// How long to wait for a control point notification.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::DeviceNotFound => TransportError::UnknownDevice(e.to_string()),
            btleplug::Error::NotConnected => TransportError::Disconnected,
            btleplug::Error::TimedOut(duration) => TransportError::Timeout {
                timeout_ms: duration.as_millis() as u64,
            },
            other => TransportError::Ble(other.to_string()),
        }
    }
}

/// Secure DFU transport on the first local Bluetooth adapter.
pub struct BleTransport {
    adapter: Adapter,
    crc: CrcFn,
    /// Pause after every data packet; `None` writes back to back.
    packet_delay: Option<Duration>,
    scan_timeout: Duration,
    /// Peripherals handed out by `request_device`, by handle id.
    peripherals: Mutex<HashMap<String, Peripheral>>,
}

impl BleTransport {
    /// Open the first Bluetooth adapter.
    pub async fn new(
        crc: CrcFn,
        packet_delay: Option<Duration>,
        scan_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Unavailable("no Bluetooth adapter found".into()))?;

        info!(
            adapter = %adapter.adapter_info().await.unwrap_or_default(),
            packet_delay_ms = packet_delay.map(|d| d.as_millis() as u64),
            "Opened Bluetooth adapter"
        );

        Ok(Self {
            adapter,
            crc,
            packet_delay,
            scan_timeout,
            peripherals: Mutex::new(HashMap::new()),
        })
    }

    async fn matches(
        &self,
        peripheral: &Peripheral,
        filter: &DeviceFilter,
    ) -> Result<Option<String>, TransportError> {
        let Some(props) = peripheral.properties().await? else {
            return Ok(None);
        };
        if filter.matches(props.local_name.as_deref(), &props.services) {
            Ok(Some(props.local_name.unwrap_or_default()))
        } else {
            Ok(None)
        }
    }

    /// Scan until a peripheral matches or the scan window closes.
    async fn scan(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<(Peripheral, String)>, TransportError> {
        let mut events = self.adapter.events().await?;
        let scan_filter = match filter {
            DeviceFilter::Service(uuid) => ScanFilter {
                services: vec![*uuid],
            },
            DeviceFilter::NamePrefix(_) => ScanFilter::default(),
        };
        self.adapter.start_scan(scan_filter).await?;
        debug!(filter = %filter, timeout = ?self.scan_timeout, "Scanning");

        let search = async {
            for peripheral in self.adapter.peripherals().await? {
                if let Some(name) = self.matches(&peripheral, filter).await? {
                    return Ok(Some((peripheral, name)));
                }
            }
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event
                {
                    let peripheral = self.adapter.peripheral(&id).await?;
                    if let Some(name) = self.matches(&peripheral, filter).await? {
                        return Ok(Some((peripheral, name)));
                    }
                }
            }
            Ok::<_, TransportError>(None)
        };
        let result = tokio::time::timeout(self.scan_timeout, search).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }

        match result {
            Ok(found) => found,
            Err(_) => {
                debug!(filter = %filter, "Scan window closed without a match");
                Ok(None)
            }
        }
    }

    fn remember(&self, peripheral: Peripheral, name: String) -> DeviceHandle {
        let id = format!("{:?}", peripheral.id());
        let handle = DeviceHandle::new(id.clone(), (!name.is_empty()).then_some(name));
        lock_unpoisoned(&self.peripherals).insert(id, peripheral);
        handle
    }

    fn peripheral(&self, device: &DeviceHandle) -> Result<Peripheral, TransportError> {
        lock_unpoisoned(&self.peripherals)
            .get(&device.id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice(device.id.clone()))
    }

    /// Connect and discover services, returning the DFU characteristics.
    async fn connect(
        &self,
        peripheral: &Peripheral,
        observer: &dyn DfuObserver,
    ) -> Result<Vec<Characteristic>, TransportError> {
        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        }
        peripheral.discover_services().await?;
        observer.log("connected to gatt server");

        let service = peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == DFU_SERVICE_UUID)
            .ok_or(TransportError::ServiceNotFound(DFU_SERVICE_UUID))?;
        observer.log("found DFU service");

        let characteristics: Vec<Characteristic> = service.characteristics.into_iter().collect();
        observer.log(&format!(
            "found {} characteristic(s)",
            characteristics.len()
        ));
        Ok(characteristics)
    }

    /// Reboot the device into its bootloader via the buttonless service.
    async fn enter_bootloader(
        &self,
        peripheral: &Peripheral,
        buttonless: &Characteristic,
        observer: &dyn DfuObserver,
    ) -> Result<(), TransportError> {
        observer.log("found buttonless characteristic");
        peripheral.subscribe(buttonless).await?;
        let mut notifications = peripheral.notifications().await?;
        observer.log("enabled buttonless notifications");

        peripheral
            .write(
                buttonless,
                &[BUTTONLESS_ENTER_BOOTLOADER],
                WriteType::WithResponse,
            )
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let response = next_value(&mut notifications, buttonless.uuid).await?;
        parse_buttonless_response(&response)?;
        observer.log("sent DFU mode");

        // The device drops the link itself while rebooting.
        if let Err(e) = peripheral.disconnect().await {
            debug!(error = %e, "Disconnect after mode switch");
        }
        Ok(())
    }
}

fn find(characteristics: &[Characteristic], uuid: Uuid) -> Option<&Characteristic> {
    characteristics.iter().find(|c| c.uuid == uuid)
}

async fn next_value(
    notifications: &mut Notifications,
    uuid: Uuid,
) -> Result<Vec<u8>, TransportError> {
    let wait = async {
        while let Some(notification) = notifications.next().await {
            if notification.uuid == uuid {
                return Ok(notification.value);
            }
        }
        Err(TransportError::Disconnected)
    };
    tokio::time::timeout(RESPONSE_TIMEOUT, wait)
        .await
        .map_err(|_| TransportError::Timeout {
            timeout_ms: RESPONSE_TIMEOUT.as_millis() as u64,
        })?
}

/// Control point conversation for one `update` call.
struct ControlPoint<'a> {
    peripheral: &'a Peripheral,
    control: Characteristic,
    packet: Characteristic,
    notifications: Notifications,
    crc: CrcFn,
    packet_delay: Option<Duration>,
    observer: &'a dyn DfuObserver,
}

impl ControlPoint<'_> {
    async fn send(&mut self, request: Request) -> Result<Vec<u8>, TransportError> {
        debug!(opcode = %request.opcode(), "Control point request");
        self.peripheral
            .write(&self.control, &request.to_bytes(), WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        let value = next_value(&mut self.notifications, CONTROL_POINT_UUID).await?;
        Ok(ControlResponse::parse(&value, request.opcode())?.payload)
    }

    /// Transfer `data` as one or more objects of type `object`.
    async fn transfer(&mut self, data: &[u8], object: ObjectType) -> Result<(), TransportError> {
        let label = object.label();
        let select = SelectResponse::parse(&self.send(Request::Select(object)).await?)?;
        debug!(
            object = label,
            max_size = select.max_size,
            offset = select.offset,
            "Selected object"
        );

        let len = data.len();
        let offset = select.offset as usize;

        if object == ObjectType::Command && offset == len && (self.crc)(data) == select.crc {
            self.observer
                .log("init packet already available, skipping transfer");
            return Ok(());
        }

        let max_size = (select.max_size as usize).max(PACKET_SIZE);
        let mut start = 0;
        if offset > 0 && offset <= len && (self.crc)(&data[..offset]) == select.crc {
            start = offset - offset % max_size;
            if start > 0 {
                info!(object = label, offset = start, "Resuming transfer");
            }
        }

        self.observer.progress(label, start as u64, len as u64);
        while start < len {
            let end = (start + max_size).min(len);
            self.send(Request::Create {
                object,
                size: (end - start) as u32,
            })
            .await?;
            self.write_packets(data, start, end, label).await?;

            let checksum = ChecksumResponse::parse(&self.send(Request::CalculateChecksum).await?)?;
            let expected = (self.crc)(&data[..end]);
            if checksum.offset as usize != end || checksum.crc != expected {
                return Err(TransportError::CrcMismatch {
                    offset: checksum.offset,
                    expected,
                    actual: checksum.crc,
                });
            }

            self.send(Request::Execute).await?;
            start = end;
        }
        self.observer.log("transfer complete");
        Ok(())
    }

    async fn write_packets(
        &mut self,
        data: &[u8],
        start: usize,
        end: usize,
        label: &str,
    ) -> Result<(), TransportError> {
        let mut written = start;
        for packet in data[start..end].chunks(PACKET_SIZE) {
            self.peripheral
                .write(&self.packet, packet, WriteType::WithoutResponse)
                .await
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            written += packet.len();
            self.observer
                .progress(label, written as u64, data.len() as u64);
            if let Some(delay) = self.packet_delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.observer
            .log(&format!("written {} bytes", written - start));
        Ok(())
    }
}

#[async_trait]
impl DfuTransport for BleTransport {
    #[instrument(skip(self, filter, observer), fields(filter = %filter))]
    async fn request_device(
        &self,
        enter_dfu: bool,
        filter: &DeviceFilter,
        observer: &dyn DfuObserver,
    ) -> Result<Option<DeviceHandle>, TransportError> {
        let Some((peripheral, name)) = self.scan(filter).await? else {
            if enter_dfu {
                return Err(TransportError::DeviceNotFound {
                    filter: filter.to_string(),
                });
            }
            return Ok(None);
        };
        info!(name = %name, "Found device");

        if !enter_dfu {
            return Ok(Some(self.remember(peripheral, name)));
        }

        let characteristics = self.connect(&peripheral, observer).await?;
        let buttonless = find(&characteristics, BUTTONLESS_UUID)
            .or_else(|| find(&characteristics, BUTTONLESS_BONDED_UUID))
            .cloned();

        match buttonless {
            Some(buttonless) => {
                self.enter_bootloader(&peripheral, &buttonless, observer)
                    .await?;
                Ok(None)
            }
            None if find(&characteristics, CONTROL_POINT_UUID).is_some() => {
                // Already running the bootloader.
                Ok(Some(self.remember(peripheral, name)))
            }
            None => Err(TransportError::CharacteristicNotFound(BUTTONLESS_UUID)),
        }
    }

    #[instrument(skip(self, device, init, image, observer), fields(device = %device, init_len = init.len(), image_len = image.len()))]
    async fn update(
        &self,
        device: &DeviceHandle,
        init: &[u8],
        image: &[u8],
        observer: &dyn DfuObserver,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device)?;
        let characteristics = self.connect(&peripheral, observer).await?;

        let packet = find(&characteristics, PACKET_UUID)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(PACKET_UUID))?;
        observer.log("found packet characteristic");
        let control = find(&characteristics, CONTROL_POINT_UUID)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(CONTROL_POINT_UUID))?;
        observer.log("found control characteristic");

        peripheral.subscribe(&control).await?;
        let notifications = peripheral.notifications().await?;
        observer.log("enabled control notifications");

        let mut control_point = ControlPoint {
            peripheral: &peripheral,
            control,
            packet,
            notifications,
            crc: self.crc,
            packet_delay: self.packet_delay,
            observer,
        };
        control_point.send(Request::SetPrn(PRN_DISABLED)).await?;

        observer.log("transferring init");
        control_point.transfer(init, ObjectType::Command).await?;
        observer.log("transferring firmware");
        control_point.transfer(image, ObjectType::Data).await?;

        observer.log("complete, disconnecting...");
        if let Err(e) = peripheral.disconnect().await {
            debug!(error = %e, "Disconnect after update");
        }
        observer.log("disconnected");
        Ok(())
    }

    #[instrument(skip(self, device, observer), fields(device = %device))]
    async fn read_firmware_version(
        &self,
        device: &DeviceHandle,
        observer: &dyn DfuObserver,
    ) -> Result<String, TransportError> {
        let peripheral = self.peripheral(device)?;
        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        }
        peripheral.discover_services().await?;
        observer.log("connected to gatt server");

        let revision = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == SOFTWARE_REVISION_UUID)
            .ok_or(TransportError::CharacteristicNotFound(SOFTWARE_REVISION_UUID))?;
        observer.log("found software revision characteristic");

        let raw = peripheral.read(&revision).await?;
        let version = String::from_utf8_lossy(&raw)
            .trim_end_matches('\0')
            .trim()
            .to_string();
        debug!(version = %version, "Read software revision");
        Ok(version)
    }
}
