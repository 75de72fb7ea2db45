//! Status service: device characteristics, battery, name, LED, torch and
//! button.
//!
//! The service UUID differs between the Pokit Meter and the Pokit Pro, so the
//! service is constructed for a specific [`ProductVariant`]. The torch and
//! button characteristics, and the trailing status fields, only exist on the
//! Pokit Pro.

use bytes::Buf;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{
    BUTTON_PRESS_UUID, DEVICE_CHARACTERISTICS_UUID, FLASH_LED_UUID, NAME_UUID, STATUS_UUID,
    TORCH_UUID,
};
use crate::codec::{check_size, decode_string, encode_string, encode_u8, DecodeError};
use crate::error::Result;
use crate::products::ProductVariant;
use crate::service::{read_all, CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

const CHARACTERISTICS: [Uuid; 6] = [
    DEVICE_CHARACTERISTICS_UUID,
    STATUS_UUID,
    NAME_UUID,
    FLASH_LED_UUID,
    TORCH_UUID,
    BUTTON_PRESS_UUID,
];

/// Fixed capabilities reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceCharacteristics {
    /// Firmware major version.
    pub firmware_major: u8,
    /// Firmware minor version.
    pub firmware_minor: u8,
    /// Maximum input voltage, in volts.
    pub maximum_voltage: u16,
    /// Maximum input current, in amps.
    pub maximum_current: u16,
    /// Maximum measurable resistance, in ohms.
    pub maximum_resistance: u16,
    /// Maximum DSO sampling rate, in kHz.
    pub maximum_sampling_rate: u16,
    /// DSO sample buffer size, in samples.
    pub sampling_buffer_size: u16,
    /// Capability bitmask (reserved).
    pub capability_mask: u16,
    /// Bluetooth MAC address, most significant byte first.
    pub mac_address: [u8; 6],
}

impl DeviceCharacteristics {
    /// Encoded size in bytes.
    pub const SIZE: usize = 20;

    /// Decode from a characteristic payload.
    pub fn decode(value: &[u8]) -> std::result::Result<Self, DecodeError> {
        check_size("device characteristics", value, Self::SIZE, Self::SIZE)?;
        let mut buf = value;
        let firmware_major = buf.get_u8();
        let firmware_minor = buf.get_u8();
        let maximum_voltage = buf.get_u16_le();
        let maximum_current = buf.get_u16_le();
        let maximum_resistance = buf.get_u16_le();
        let maximum_sampling_rate = buf.get_u16_le();
        let sampling_buffer_size = buf.get_u16_le();
        let capability_mask = buf.get_u16_le();
        let mut mac_address = [0u8; 6];
        buf.copy_to_slice(&mut mac_address);

        Ok(Self {
            firmware_major,
            firmware_minor,
            maximum_voltage,
            maximum_current,
            maximum_resistance,
            maximum_sampling_rate,
            sampling_buffer_size,
            capability_mask,
            mac_address,
        })
    }

    /// Firmware version as `major.minor`.
    pub fn firmware_version(&self) -> String {
        format!("{}.{}", self.firmware_major, self.firmware_minor)
    }

    /// MAC address as `AA:BB:CC:DD:EE:FF`.
    pub fn mac_address_string(&self) -> String {
        self.mac_address
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// What the device is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceStatus {
    /// Not measuring.
    Idle,
    MultimeterDcVoltage,
    MultimeterAcVoltage,
    MultimeterDcCurrent,
    MultimeterAcCurrent,
    MultimeterResistance,
    MultimeterDiode,
    MultimeterContinuity,
    MultimeterTemperature,
    /// Capturing in DSO mode.
    DsoModeSampling,
    /// Logging in data logger mode.
    LoggerModeSampling,
    /// Unrecognised status byte.
    Unknown,
}

impl DeviceStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::MultimeterDcVoltage,
            2 => Self::MultimeterAcVoltage,
            3 => Self::MultimeterDcCurrent,
            4 => Self::MultimeterAcCurrent,
            5 => Self::MultimeterResistance,
            6 => Self::MultimeterDiode,
            7 => Self::MultimeterContinuity,
            8 => Self::MultimeterTemperature,
            9 => Self::DsoModeSampling,
            10 => Self::LoggerModeSampling,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "Idle",
            Self::MultimeterDcVoltage => "MultimeterDcVoltage",
            Self::MultimeterAcVoltage => "MultimeterAcVoltage",
            Self::MultimeterDcCurrent => "MultimeterDcCurrent",
            Self::MultimeterAcCurrent => "MultimeterAcCurrent",
            Self::MultimeterResistance => "MultimeterResistance",
            Self::MultimeterDiode => "MultimeterDiode",
            Self::MultimeterContinuity => "MultimeterContinuity",
            Self::MultimeterTemperature => "MultimeterTemperature",
            Self::DsoModeSampling => "DsoModeSampling",
            Self::LoggerModeSampling => "LoggerModeSampling",
            Self::Unknown => "Unknown",
        };
        write!(f, "{}", text)
    }
}

/// Battery health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BatteryStatus {
    /// Needs charging or replacing.
    Low,
    /// Healthy.
    Good,
    /// Unrecognised status byte.
    Unknown,
}

impl BatteryStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Good,
            _ => Self::Unknown,
        }
    }

    /// Check if battery is low.
    pub fn is_low(&self) -> bool {
        matches!(self, Self::Low)
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Good => write!(f, "Good"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Position of the Pokit Pro's selector switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SwitchPosition {
    /// Voltage input.
    Voltage,
    /// Resistance, diode, continuity and low current.
    MultiMode,
    /// High-current input.
    HighCurrent,
    /// Unrecognised switch byte.
    Unknown,
}

impl SwitchPosition {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Voltage,
            1 => Self::MultiMode,
            2 => Self::HighCurrent,
            _ => Self::Unknown,
        }
    }
}

/// Charging state of the Pokit Pro's battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChargingStatus {
    /// Running on battery.
    Discharging,
    /// Charging.
    Charging,
    /// Fully charged.
    Charged,
    /// Unrecognised charging byte.
    Unknown,
}

impl ChargingStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Discharging,
            1 => Self::Charging,
            2 => Self::Charged,
            _ => Self::Unknown,
        }
    }
}

/// Decoded Status characteristic.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status {
    /// Current activity.
    pub device_status: DeviceStatus,
    /// Battery voltage, in volts.
    pub battery_voltage: f32,
    /// Battery health, when the firmware reports it.
    pub battery_status: Option<BatteryStatus>,
    /// Pokit Pro only.
    pub switch_position: Option<SwitchPosition>,
    /// Pokit Pro only.
    pub charging_status: Option<ChargingStatus>,
}

impl Status {
    /// Minimum encoded size in bytes.
    pub const MIN_SIZE: usize = 5;
    /// Largest encoded size understood.
    pub const MAX_SIZE: usize = 8;

    /// Decode from a characteristic payload.
    pub fn decode(value: &[u8]) -> std::result::Result<Self, DecodeError> {
        check_size("status", value, Self::MIN_SIZE, Self::MAX_SIZE)?;
        let mut buf = value;
        let device_status = DeviceStatus::from_raw(buf.get_u8());
        let battery_voltage = buf.get_f32_le();
        let battery_status = buf
            .has_remaining()
            .then(|| BatteryStatus::from_raw(buf.get_u8()));
        let switch_position = buf
            .has_remaining()
            .then(|| SwitchPosition::from_raw(buf.get_u8()));
        let charging_status = buf
            .has_remaining()
            .then(|| ChargingStatus::from_raw(buf.get_u8()));

        Ok(Self {
            device_status,
            battery_voltage,
            battery_status,
            switch_position,
            charging_status,
        })
    }
}

/// Torch (Pokit Pro flashlight) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TorchStatus {
    /// Torch off.
    Off,
    /// Torch on.
    On,
}

impl TorchStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Off,
            _ => Self::On,
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }
}

/// Pokit Pro button state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ButtonStatus {
    /// Button up.
    Released,
    /// Short press.
    Pressed,
    /// Press held down.
    Held,
    /// Unrecognised button byte.
    Unknown,
}

impl ButtonStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Released,
            1 => Self::Pressed,
            2 => Self::Held,
            _ => Self::Unknown,
        }
    }

    /// Decode the two-byte Button Press payload; the first byte is reserved.
    pub fn decode(value: &[u8]) -> std::result::Result<Self, DecodeError> {
        check_size("button press", value, 2, 2)?;
        Ok(Self::from_raw(value[1]))
    }
}

/// Typed events raised by [`StatusService`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Device characteristics were read.
    DeviceCharacteristicsRead(DeviceCharacteristics),
    /// Status was read or notified.
    StatusRead(Status),
    /// The device name was read.
    DeviceNameRead(String),
    /// The device accepted a new name.
    DeviceNameWritten,
    /// The device acknowledged a flash-LED request.
    DeviceLedFlashed,
    /// Torch state was read or notified.
    TorchStatusRead(TorchStatus),
    /// The device accepted a torch change.
    TorchStatusWritten,
    /// Button state was read or notified.
    ButtonPressed(ButtonStatus),
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// The Pokit Status service.
pub struct StatusService {
    core: ServiceCore,
    product: ProductVariant,
    events: EventChannel<StatusEvent>,
}

impl StatusService {
    /// Maximum encoded length of a device name, in bytes.
    pub const MAX_NAME_LENGTH: usize = 11;

    /// Create the service for `product` on `transport`.
    pub fn new(transport: Arc<dyn Transport>, product: ProductVariant) -> Self {
        Self {
            core: ServiceCore::new("Status", product.status_service_uuid(), transport),
            product,
            events: EventChannel::new(),
        }
    }

    /// Product this service was created for.
    pub fn product(&self) -> ProductVariant {
        self.product
    }

    /// Queue a read of firmware version, limits and MAC address.
    pub fn read_device_characteristics(&self) -> Result<()> {
        self.core.read(DEVICE_CHARACTERISTICS_UUID)
    }

    /// Queue a read of the current status.
    pub fn read_status(&self) -> Result<()> {
        self.core.read(STATUS_UUID)
    }

    /// Queue a read of the device name.
    pub fn read_name(&self) -> Result<()> {
        self.core.read(NAME_UUID)
    }

    /// Pokit Pro only.
    pub fn read_torch(&self) -> Result<()> {
        self.core.read(TORCH_UUID)
    }

    /// Pokit Pro only.
    pub fn read_button_press(&self) -> Result<()> {
        self.core.read(BUTTON_PRESS_UUID)
    }

    /// Cached device characteristics.
    pub fn device_characteristics(&self) -> Option<DeviceCharacteristics> {
        let value = self.core.value(&DEVICE_CHARACTERISTICS_UUID)?;
        DeviceCharacteristics::decode(&value).ok()
    }

    /// Cached status.
    pub fn status(&self) -> Option<Status> {
        let value = self.core.value(&STATUS_UUID)?;
        Status::decode(&value).ok()
    }

    /// Cached device name.
    pub fn device_name(&self) -> Option<String> {
        let value = self.core.value(&NAME_UUID)?;
        decode_string("name", &value).ok()
    }

    /// Cached torch state.
    pub fn torch_status(&self) -> Option<TorchStatus> {
        let value = self.core.value(&TORCH_UUID)?;
        check_size("torch", &value, 1, 1).ok()?;
        Some(TorchStatus::from_raw(value[0]))
    }

    /// Cached button state.
    pub fn button_press(&self) -> Option<ButtonStatus> {
        let value = self.core.value(&BUTTON_PRESS_UUID)?;
        ButtonStatus::decode(&value).ok()
    }

    /// Queue a write of a new device name.
    ///
    /// Names longer than [`Self::MAX_NAME_LENGTH`] bytes once encoded are
    /// rejected without touching the transport.
    pub fn set_device_name(&self, name: &str) -> Result<()> {
        let value = encode_string("device name", name, Self::MAX_NAME_LENGTH)?;
        self.core.write(NAME_UUID, value)
    }

    /// Flash the device's LED.
    pub fn flash_led(&self) -> Result<()> {
        self.core.write(FLASH_LED_UUID, encode_u8(1))
    }

    /// Turn the torch on or off. Pokit Pro only.
    pub fn set_torch(&self, status: TorchStatus) -> Result<()> {
        self.core.write(TORCH_UUID, encode_u8(status.to_raw()))
    }

    /// Receive status changes as they happen.
    pub fn enable_status_notifications(&self) -> Result<()> {
        self.core.enable_notifications(STATUS_UUID)
    }

    pub fn disable_status_notifications(&self) -> Result<()> {
        self.core.disable_notifications(STATUS_UUID)
    }

    /// Pokit Pro only.
    pub fn enable_torch_notifications(&self) -> Result<()> {
        self.core.enable_notifications(TORCH_UUID)
    }

    pub fn disable_torch_notifications(&self) -> Result<()> {
        self.core.disable_notifications(TORCH_UUID)
    }

    /// Pokit Pro only.
    pub fn enable_button_press_notifications(&self) -> Result<()> {
        self.core.enable_notifications(BUTTON_PRESS_UUID)
    }

    pub fn disable_button_press_notifications(&self) -> Result<()> {
        self.core.disable_notifications(BUTTON_PRESS_UUID)
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }

    fn decode_event(&self, characteristic: &Uuid, value: &[u8]) -> Option<StatusEvent> {
        let event = match *characteristic {
            DEVICE_CHARACTERISTICS_UUID => {
                StatusEvent::DeviceCharacteristicsRead(DeviceCharacteristics::decode(value).ok()?)
            }
            STATUS_UUID => StatusEvent::StatusRead(Status::decode(value).ok()?),
            NAME_UUID => StatusEvent::DeviceNameRead(decode_string("name", value).ok()?),
            TORCH_UUID => {
                check_size("torch", value, 1, 1).ok()?;
                StatusEvent::TorchStatusRead(TorchStatus::from_raw(value[0]))
            }
            BUTTON_PRESS_UUID => StatusEvent::ButtonPressed(ButtonStatus::decode(value).ok()?),
            _ => {
                warn!("Unexpected value for Status characteristic: {}", characteristic);
                return None;
            }
        };
        debug!("{:?}", event);
        Some(event)
    }
}

impl PokitService for StatusService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn read_characteristics(&self) -> Result<()> {
        let mut characteristics = vec![DEVICE_CHARACTERISTICS_UUID, STATUS_UUID, NAME_UUID];
        if self.product.is_pro() {
            characteristics.extend([TORCH_UUID, BUTTON_PRESS_UUID]);
        }
        read_all(&self.core, &characteristics)
    }

    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]) {
        if let Some(event) = self.decode_event(characteristic, value) {
            self.events.emit(event);
        }
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        let event = match *characteristic {
            NAME_UUID => StatusEvent::DeviceNameWritten,
            FLASH_LED_UUID => StatusEvent::DeviceLedFlashed,
            TORCH_UUID => StatusEvent::TorchStatusWritten,
            _ => {
                warn!("Unknown characteristic written for Status: {}", characteristic);
                return;
            }
        };
        self.events.emit(event);
    }

    fn characteristic_changed(&self, characteristic: &Uuid, value: &[u8]) {
        match *characteristic {
            STATUS_UUID | TORCH_UUID | BUTTON_PRESS_UUID => {
                self.characteristic_read(characteristic, value)
            }
            _ => warn!("Unexpected notification for Status: {}", characteristic),
        }
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(StatusEvent::Error(error.clone()));
    }
}
