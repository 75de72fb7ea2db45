//! Device Information service: read-only identity strings.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{
    DEVICE_INFO_SERVICE_UUID, FIRMWARE_REVISION_UUID, HARDWARE_REVISION_UUID,
    MANUFACTURER_NAME_UUID, MODEL_NUMBER_UUID, SERIAL_NUMBER_UUID, SOFTWARE_REVISION_UUID,
};
use crate::codec::decode_string;
use crate::error::Result;
use crate::service::{read_all, CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

const CHARACTERISTICS: [Uuid; 6] = [
    MANUFACTURER_NAME_UUID,
    MODEL_NUMBER_UUID,
    FIRMWARE_REVISION_UUID,
    HARDWARE_REVISION_UUID,
    SOFTWARE_REVISION_UUID,
    SERIAL_NUMBER_UUID,
];

/// Typed events raised by [`DeviceInfoService`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceInfoEvent {
    /// Manufacturer name was read.
    ManufacturerRead(String),
    /// Model number was read.
    ModelNumberRead(String),
    /// Firmware revision was read.
    FirmwareRevisionRead(String),
    /// Hardware revision was read.
    HardwareRevisionRead(String),
    /// Software revision was read.
    SoftwareRevisionRead(String),
    /// Serial number was read.
    SerialNumberRead(String),
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// Snapshot of every cached identity string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub firmware_revision: Option<String>,
    pub hardware_revision: Option<String>,
    pub software_revision: Option<String>,
    pub serial_number: Option<String>,
}

/// The standard Device Information service.
pub struct DeviceInfoService {
    core: ServiceCore,
    events: EventChannel<DeviceInfoEvent>,
}

impl DeviceInfoService {
    /// Create the service on `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            core: ServiceCore::new("Device Info", DEVICE_INFO_SERVICE_UUID, transport),
            events: EventChannel::new(),
        }
    }

    /// Queue a read of the manufacturer name.
    pub fn read_manufacturer(&self) -> Result<()> {
        self.core.read(MANUFACTURER_NAME_UUID)
    }

    /// Queue a read of the model number.
    pub fn read_model_number(&self) -> Result<()> {
        self.core.read(MODEL_NUMBER_UUID)
    }

    /// Queue a read of the firmware revision.
    pub fn read_firmware_revision(&self) -> Result<()> {
        self.core.read(FIRMWARE_REVISION_UUID)
    }

    /// Queue a read of the hardware revision.
    pub fn read_hardware_revision(&self) -> Result<()> {
        self.core.read(HARDWARE_REVISION_UUID)
    }

    /// Queue a read of the software revision.
    pub fn read_software_revision(&self) -> Result<()> {
        self.core.read(SOFTWARE_REVISION_UUID)
    }

    /// Queue a read of the serial number.
    pub fn read_serial_number(&self) -> Result<()> {
        self.core.read(SERIAL_NUMBER_UUID)
    }

    pub fn manufacturer(&self) -> Option<String> {
        self.string(&MANUFACTURER_NAME_UUID)
    }

    pub fn model_number(&self) -> Option<String> {
        self.string(&MODEL_NUMBER_UUID)
    }

    pub fn firmware_revision(&self) -> Option<String> {
        self.string(&FIRMWARE_REVISION_UUID)
    }

    pub fn hardware_revision(&self) -> Option<String> {
        self.string(&HARDWARE_REVISION_UUID)
    }

    pub fn software_revision(&self) -> Option<String> {
        self.string(&SOFTWARE_REVISION_UUID)
    }

    pub fn serial_number(&self) -> Option<String> {
        self.string(&SERIAL_NUMBER_UUID)
    }

    /// All cached identity strings.
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            manufacturer: self.manufacturer(),
            model_number: self.model_number(),
            firmware_revision: self.firmware_revision(),
            hardware_revision: self.hardware_revision(),
            software_revision: self.software_revision(),
            serial_number: self.serial_number(),
        }
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceInfoEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DeviceInfoEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }

    fn string(&self, characteristic: &Uuid) -> Option<String> {
        let value = self.core.value(characteristic)?;
        decode_string("device info", &value).ok()
    }
}

impl PokitService for DeviceInfoService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn read_characteristics(&self) -> Result<()> {
        read_all(&self.core, &CHARACTERISTICS)
    }

    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]) {
        let Ok(text) = decode_string("device info", value) else {
            return;
        };
        debug!("{}: {:?}", self.core.describe(characteristic), text);

        let event = match *characteristic {
            MANUFACTURER_NAME_UUID => DeviceInfoEvent::ManufacturerRead(text),
            MODEL_NUMBER_UUID => DeviceInfoEvent::ModelNumberRead(text),
            FIRMWARE_REVISION_UUID => DeviceInfoEvent::FirmwareRevisionRead(text),
            HARDWARE_REVISION_UUID => DeviceInfoEvent::HardwareRevisionRead(text),
            SOFTWARE_REVISION_UUID => DeviceInfoEvent::SoftwareRevisionRead(text),
            SERIAL_NUMBER_UUID => DeviceInfoEvent::SerialNumberRead(text),
            _ => {
                warn!("Unknown characteristic read for Device Info: {}", characteristic);
                return;
            }
        };
        self.events.emit(event);
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        warn!(
            "Characteristic written event for Device Info, but no characteristics are writable: {}",
            characteristic
        );
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(DeviceInfoEvent::Error(error.clone()));
    }
}
