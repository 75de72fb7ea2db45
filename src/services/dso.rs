//! DSO (digital storage oscilloscope) service.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{DSO_METADATA_UUID, DSO_READING_UUID, DSO_SERVICE_UUID, DSO_SETTINGS_UUID};
use crate::codec::{check_size, decode_samples, DecodeError};
use crate::error::Result;
use crate::modes::MeasurementMode;
use crate::products::ProductVariant;
use crate::ranges::{self, RangeCode, RangeRequest};
use crate::service::{CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

/// How sampling is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DsoCommand {
    /// Capture immediately.
    #[default]
    FreeRunning = 0,
    /// Capture once the signal rises through the trigger level.
    RisingEdgeTrigger = 1,
    /// Capture once the signal falls through the trigger level.
    FallingEdgeTrigger = 2,
    /// Resend the last capture.
    ResendData = 3,
}

/// Quantity the DSO samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DsoMode {
    Idle = 0,
    #[default]
    DcVoltage = 1,
    AcVoltage = 2,
    DcCurrent = 3,
    AcCurrent = 4,
}

impl DsoMode {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::DcVoltage),
            2 => Some(Self::AcVoltage),
            3 => Some(Self::DcCurrent),
            4 => Some(Self::AcCurrent),
            _ => None,
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Multimeter mode with the same range table and unit.
    pub fn measurement_mode(&self) -> MeasurementMode {
        match self {
            Self::Idle => MeasurementMode::Idle,
            Self::DcVoltage => MeasurementMode::DcVoltage,
            Self::AcVoltage => MeasurementMode::AcVoltage,
            Self::DcCurrent => MeasurementMode::DcCurrent,
            Self::AcCurrent => MeasurementMode::AcCurrent,
        }
    }
}

/// Capture state reported in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DsoStatus {
    /// Capture complete.
    Done,
    /// Waiting for a trigger or capturing.
    Sampling,
    /// The device reported an error.
    Error,
    /// Unrecognised status byte.
    Unknown,
}

impl DsoStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Done,
            1 => Self::Sampling,
            0xFF => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Outgoing capture configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DsoSettings {
    /// Trigger behaviour.
    pub command: DsoCommand,
    /// Trigger level, in the mode's unit. Ignored when free running.
    pub trigger_level: f32,
    /// Quantity to capture.
    pub mode: DsoMode,
    /// Range code; [`RangeCode::AUTO`] for auto-ranging.
    pub range: RangeCode,
    /// Capture window, in microseconds.
    pub sampling_window: u32,
    /// Samples to take across the window.
    pub number_of_samples: u16,
}

impl DsoSettings {
    /// Encoded size in bytes.
    pub const SIZE: usize = 13;

    /// Encode for the Settings characteristic.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.command as u8);
        buf.put_f32_le(self.trigger_level);
        buf.put_u8(self.mode.to_raw());
        buf.put_u8(self.range.to_raw());
        buf.put_u32_le(self.sampling_window);
        buf.put_u16_le(self.number_of_samples);
        buf.freeze()
    }
}

impl Default for DsoSettings {
    fn default() -> Self {
        Self {
            command: DsoCommand::FreeRunning,
            trigger_level: 0.0,
            mode: DsoMode::DcVoltage,
            range: RangeCode::AUTO,
            sampling_window: 1_000,
            number_of_samples: 1_000,
        }
    }
}

/// Description of the most recent capture.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DsoMetadata {
    /// Capture state.
    pub status: DsoStatus,
    /// Multiplier converting raw samples to the mode's unit.
    pub scale: f32,
    /// Quantity captured.
    pub mode: DsoMode,
    /// Range code in effect.
    pub range: RangeCode,
    /// Capture window, in microseconds.
    pub sampling_window: u32,
    /// Samples in the capture.
    pub number_of_samples: u16,
    /// Sampling rate, in Hz.
    pub sampling_rate: u32,
}

impl DsoMetadata {
    /// Encoded size in bytes.
    pub const SIZE: usize = 17;

    /// Decode from a Metadata characteristic payload.
    pub fn decode(value: &[u8]) -> std::result::Result<Self, DecodeError> {
        check_size("DSO metadata", value, Self::SIZE, Self::SIZE)?;
        let mut buf = value;
        let status = DsoStatus::from_raw(buf.get_u8());
        let scale = buf.get_f32_le();
        let raw_mode = buf.get_u8();
        let mode = DsoMode::from_raw(raw_mode).ok_or(DecodeError::InvalidValue {
            label: "DSO mode",
            value: raw_mode,
        })?;
        Ok(Self {
            status,
            scale,
            mode,
            range: RangeCode(buf.get_u8()),
            sampling_window: buf.get_u32_le(),
            number_of_samples: buf.get_u16_le(),
            sampling_rate: buf.get_u32_le(),
        })
    }

    /// Convert raw samples to values in the mode's unit.
    pub fn scale_samples(&self, samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|s| *s as f32 * self.scale).collect()
    }
}

/// Typed events raised by [`DsoService`].
#[derive(Debug, Clone, PartialEq)]
pub enum DsoEvent {
    /// The device accepted new settings.
    SettingsWritten,
    /// Metadata was read or notified.
    MetadataRead(DsoMetadata),
    /// A batch of raw samples arrived.
    SamplesRead(Vec<i16>),
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// The Pokit DSO service.
pub struct DsoService {
    core: ServiceCore,
    product: ProductVariant,
    events: EventChannel<DsoEvent>,
}

impl DsoService {
    /// Create the service for `product` on `transport`.
    pub fn new(transport: Arc<dyn Transport>, product: ProductVariant) -> Self {
        Self {
            core: ServiceCore::new("DSO", DSO_SERVICE_UUID, transport),
            product,
            events: EventChannel::new(),
        }
    }

    /// Product this service was created for.
    pub fn product(&self) -> ProductVariant {
        self.product
    }

    /// Write `settings` to the device.
    pub fn set_settings(&self, settings: &DsoSettings) -> Result<()> {
        debug!("DSO settings: {:?}", settings);
        self.core.write(DSO_SETTINGS_UUID, settings.encode())
    }

    /// Start a capture with `settings`.
    pub fn start_dso(&self, settings: &DsoSettings) -> Result<()> {
        if settings.command == DsoCommand::ResendData {
            warn!("Starting the DSO with a resend command; no new capture will be taken");
        }
        self.set_settings(settings)
    }

    /// Ask the device to resend the last capture as Reading notifications.
    pub fn fetch_samples(&self) -> Result<()> {
        self.set_settings(&DsoSettings {
            command: DsoCommand::ResendData,
            trigger_level: 0.0,
            mode: DsoMode::Idle,
            range: RangeCode::AUTO,
            sampling_window: 0,
            number_of_samples: 0,
        })
    }

    /// Queue a read of the capture metadata.
    pub fn read_metadata(&self) -> Result<()> {
        self.core.read(DSO_METADATA_UUID)
    }

    pub fn enable_metadata_notifications(&self) -> Result<()> {
        self.core.enable_notifications(DSO_METADATA_UUID)
    }

    pub fn disable_metadata_notifications(&self) -> Result<()> {
        self.core.disable_notifications(DSO_METADATA_UUID)
    }

    pub fn enable_reading_notifications(&self) -> Result<()> {
        self.core.enable_notifications(DSO_READING_UUID)
    }

    pub fn disable_reading_notifications(&self) -> Result<()> {
        self.core.disable_notifications(DSO_READING_UUID)
    }

    /// Cached metadata.
    pub fn metadata(&self) -> Option<DsoMetadata> {
        let value = self.core.value(&DSO_METADATA_UUID)?;
        DsoMetadata::decode(&value).ok()
    }

    /// Range code for `request` on this product.
    pub fn range_for(&self, mode: DsoMode, request: RangeRequest) -> RangeCode {
        ranges::range_for(self.product, mode.measurement_mode(), request)
    }

    /// Render a range code, e.g. `Up to 2V`.
    pub fn range_to_string(&self, mode: DsoMode, range: RangeCode) -> Option<String> {
        ranges::range_to_string(self.product, mode.measurement_mode(), range)
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<DsoEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DsoEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }
}

impl PokitService for DsoService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &[DSO_SETTINGS_UUID, DSO_METADATA_UUID, DSO_READING_UUID]
    }

    fn read_characteristics(&self) -> Result<()> {
        self.read_metadata()
    }

    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]) {
        match *characteristic {
            DSO_METADATA_UUID => {
                if let Ok(metadata) = DsoMetadata::decode(value) {
                    debug!("DSO metadata: {:?}", metadata);
                    self.events.emit(DsoEvent::MetadataRead(metadata));
                }
            }
            DSO_READING_UUID => {
                if let Ok(samples) = decode_samples("DSO samples", value) {
                    self.events.emit(DsoEvent::SamplesRead(samples));
                }
            }
            _ => warn!("Unexpected value for DSO characteristic: {}", characteristic),
        }
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        match *characteristic {
            DSO_SETTINGS_UUID => self.events.emit(DsoEvent::SettingsWritten),
            _ => warn!("Unknown characteristic written for DSO: {}", characteristic),
        }
    }

    fn characteristic_changed(&self, characteristic: &Uuid, value: &[u8]) {
        self.characteristic_read(characteristic, value);
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(DsoEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::*;
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    fn metadata_bytes() -> Vec<u8> {
        let mut bytes = vec![0];
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&[2, 3]);
        bytes.extend_from_slice(&20_000u32.to_le_bytes());
        bytes.extend_from_slice(&500u16.to_le_bytes());
        bytes.extend_from_slice(&25_000u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_settings_encoding() {
        let settings = DsoSettings {
            command: DsoCommand::RisingEdgeTrigger,
            trigger_level: 1.0,
            mode: DsoMode::AcVoltage,
            range: RangeCode(2),
            sampling_window: 1_000_000,
            number_of_samples: 1_000,
        };
        assert_eq!(
            &settings.encode()[..],
            &[1, 0x00, 0x00, 0x80, 0x3F, 2, 2, 0x40, 0x42, 0x0F, 0x00, 0xE8, 0x03]
        );
        assert_eq!(DsoSettings::default().encode().len(), DsoSettings::SIZE);
    }

    #[test]
    fn test_metadata_decoding() {
        let metadata = DsoMetadata::decode(&metadata_bytes()).unwrap();
        assert_eq!(metadata.status, DsoStatus::Done);
        assert_eq!(metadata.mode, DsoMode::AcVoltage);
        assert_eq!(metadata.range, RangeCode(3));
        assert_eq!(metadata.sampling_window, 20_000);
        assert_eq!(metadata.number_of_samples, 500);
        assert_eq!(metadata.sampling_rate, 25_000);
        assert_eq!(metadata.scale_samples(&[4]), vec![1.0]);

        assert!(DsoMetadata::decode(&metadata_bytes()[..16]).is_err());
        let mut bad_mode = metadata_bytes();
        bad_mode[5] = 9;
        assert!(DsoMetadata::decode(&bad_mode).is_err());
    }

    #[tokio::test]
    async fn test_capture_flow() {
        let svc = DSO_SERVICE_UUID;
        let transport = FakeTransport::new(
            vec![svc],
            &[
                (svc, DSO_SETTINGS_UUID),
                (svc, DSO_METADATA_UUID),
                (svc, DSO_READING_UUID),
            ],
        );
        let dso = DsoService::new(transport.clone(), ProductVariant::PokitPro);
        let mut rx = dso.subscribe();

        assert_ok!(dso.enable_metadata_notifications());
        assert_ok!(dso.enable_reading_notifications());
        assert_ok!(dso.start_dso(&DsoSettings::default()));
        assert_ok!(dso.fetch_samples());
        assert_eq!(transport.writes()[1].1[0], DsoCommand::ResendData as u8);

        dso.handle_event(&write_complete(svc, DSO_SETTINGS_UUID, &[]));
        dso.handle_event(&notification(svc, DSO_METADATA_UUID, &metadata_bytes()));
        dso.handle_event(&notification(svc, DSO_READING_UUID, &[0x10, 0x00, 0xF0, 0xFF]));
        // Odd-length sample payloads are dropped.
        dso.handle_event(&notification(svc, DSO_READING_UUID, &[0x10]));

        assert_eq!(rx.recv().await.unwrap(), DsoEvent::SettingsWritten);
        assert!(matches!(rx.recv().await.unwrap(), DsoEvent::MetadataRead(m) if m.sampling_rate == 25_000));
        assert_eq!(rx.recv().await.unwrap(), DsoEvent::SamplesRead(vec![16, -16]));
        assert!(rx.try_recv().is_err());
    }
}
