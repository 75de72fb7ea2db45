//! Data Logger service: long-running on-device sampling.
//!
//! The Pokit Meter and Pokit Pro encode the logging interval differently:
//! the Meter uses whole seconds in 16 bits, the Pro milliseconds in 32 bits.
//! Both are exposed here in milliseconds.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{
    DATA_LOGGER_METADATA_UUID, DATA_LOGGER_READING_UUID, DATA_LOGGER_SERVICE_UUID,
    DATA_LOGGER_SETTINGS_UUID,
};
use crate::codec::{check_size, decode_samples, DecodeError};
use crate::error::Result;
use crate::modes::MeasurementMode;
use crate::products::ProductVariant;
use crate::ranges::{self, RangeCode, RangeRequest};
use crate::service::{CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

/// Command carried by a settings write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum LoggerCommand {
    /// Begin logging.
    #[default]
    Start = 0,
    /// End the current session.
    Stop = 1,
    /// Ask the device to resend its samples.
    Refresh = 2,
}

/// Quantity the logger samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum LoggerMode {
    /// Not logging.
    Idle = 0,
    /// DC voltage.
    #[default]
    DcVoltage = 1,
    /// AC voltage.
    AcVoltage = 2,
    /// DC current.
    DcCurrent = 3,
    /// AC current.
    AcCurrent = 4,
    /// Internal temperature sensor.
    Temperature = 5,
}

impl LoggerMode {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::DcVoltage),
            2 => Some(Self::AcVoltage),
            3 => Some(Self::DcCurrent),
            4 => Some(Self::AcCurrent),
            5 => Some(Self::Temperature),
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
            Self::Temperature => MeasurementMode::Temperature,
        }
    }
}

impl fmt::Display for LoggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.measurement_mode().as_str())
    }
}

/// Logger state reported in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoggerStatus {
    /// Session finished.
    Done,
    /// Session in progress.
    Sampling,
    /// Device storage is full; logging has stopped.
    BufferFull,
    /// The device reported an error.
    Error,
    /// Unrecognised status byte.
    Unknown,
}

impl LoggerStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Done,
            1 => Self::Sampling,
            2 => Self::BufferFull,
            0xFF => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Outgoing logger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataLoggerSettings {
    /// What the device should do with these settings.
    pub command: LoggerCommand,
    /// Quantity to log.
    pub mode: LoggerMode,
    /// Range code; [`RangeCode::AUTO`] for auto-ranging.
    pub range: RangeCode,
    /// Interval between samples, in milliseconds. Whole seconds on the Pokit
    /// Meter.
    pub update_interval: u32,
    /// Logging start time, in seconds since the Unix epoch.
    pub timestamp: u32,
}

impl DataLoggerSettings {
    /// Encoded size on the Pokit Meter.
    pub const METER_SIZE: usize = 11;
    /// Encoded size on the Pokit Pro.
    pub const PRO_SIZE: usize = 13;

    /// Settings that only carry `command`.
    pub fn command(command: LoggerCommand) -> Self {
        Self {
            command,
            mode: LoggerMode::Idle,
            range: RangeCode::AUTO,
            update_interval: 0,
            timestamp: 0,
        }
    }

    /// Encode for `product`'s Settings characteristic.
    pub fn encode(&self, product: ProductVariant) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::PRO_SIZE);
        buf.put_u8(self.command as u8);
        buf.put_u16_le(0); // reserved
        buf.put_u8(self.mode.to_raw());
        buf.put_u8(self.range.to_raw());
        if product.is_pro() {
            buf.put_u32_le(self.update_interval);
        } else {
            let seconds = (self.update_interval / 1000).min(u16::MAX as u32) as u16;
            buf.put_u16_le(seconds);
        }
        buf.put_u32_le(self.timestamp);
        buf.freeze()
    }
}

impl Default for DataLoggerSettings {
    fn default() -> Self {
        Self {
            command: LoggerCommand::Start,
            mode: LoggerMode::DcVoltage,
            range: RangeCode::AUTO,
            update_interval: 60_000,
            timestamp: 0,
        }
    }
}

/// State of the current or most recent logging session.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoggerMetadata {
    /// Session state.
    pub status: LoggerStatus,
    /// Multiplier converting raw samples to the mode's unit.
    pub scale: f32,
    /// Quantity being logged.
    pub mode: LoggerMode,
    /// Range code in effect.
    pub range: RangeCode,
    /// Interval between samples, in milliseconds.
    pub update_interval: u32,
    /// Samples stored so far.
    pub number_of_samples: u16,
    /// Logging start time, in seconds since the Unix epoch.
    pub timestamp: u32,
}

impl LoggerMetadata {
    /// Encoded size on the Pokit Meter.
    pub const METER_SIZE: usize = 15;
    /// Encoded size on the Pokit Pro.
    pub const PRO_SIZE: usize = 17;

    /// Decode from `product`'s Metadata characteristic.
    pub fn decode(value: &[u8], product: ProductVariant) -> std::result::Result<Self, DecodeError> {
        let size = if product.is_pro() {
            Self::PRO_SIZE
        } else {
            Self::METER_SIZE
        };
        check_size("logger metadata", value, size, size)?;

        let mut buf = value;
        let status = LoggerStatus::from_raw(buf.get_u8());
        let scale = buf.get_f32_le();
        let raw_mode = buf.get_u8();
        let mode = LoggerMode::from_raw(raw_mode).ok_or(DecodeError::InvalidValue {
            label: "logger mode",
            value: raw_mode,
        })?;
        let range = RangeCode(buf.get_u8());
        let update_interval = if product.is_pro() {
            buf.get_u32_le()
        } else {
            buf.get_u16_le() as u32 * 1000
        };
        let number_of_samples = buf.get_u16_le();
        let timestamp = buf.get_u32_le();

        Ok(Self {
            status,
            scale,
            mode,
            range,
            update_interval,
            number_of_samples,
            timestamp,
        })
    }

    /// Logging start time.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp as i64, 0)
    }

    /// Convert raw samples to values in the mode's unit.
    pub fn scale_samples(&self, samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|s| *s as f32 * self.scale).collect()
    }
}

/// Typed events raised by [`DataLoggerService`].
#[derive(Debug, Clone, PartialEq)]
pub enum DataLoggerEvent {
    /// The device accepted new settings.
    SettingsWritten,
    /// Metadata was read or notified.
    MetadataRead(LoggerMetadata),
    /// A batch of raw samples arrived.
    SamplesRead(Vec<i16>),
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// The Pokit Data Logger service.
pub struct DataLoggerService {
    core: ServiceCore,
    product: ProductVariant,
    events: EventChannel<DataLoggerEvent>,
}

impl DataLoggerService {
    /// Create the service for `product` on `transport`.
    pub fn new(transport: Arc<dyn Transport>, product: ProductVariant) -> Self {
        Self {
            core: ServiceCore::new("Data Logger", DATA_LOGGER_SERVICE_UUID, transport),
            product,
            events: EventChannel::new(),
        }
    }

    /// Product this service was created for.
    pub fn product(&self) -> ProductVariant {
        self.product
    }

    /// Write `settings` to the device.
    pub fn set_settings(&self, settings: &DataLoggerSettings) -> Result<()> {
        debug!("Logger settings: {:?}", settings);
        self.core
            .write(DATA_LOGGER_SETTINGS_UUID, settings.encode(self.product))
    }

    /// Start logging with `settings`.
    ///
    /// A zero timestamp is replaced with the current time.
    pub fn start_logger(&self, settings: &DataLoggerSettings) -> Result<()> {
        let mut settings = DataLoggerSettings {
            command: LoggerCommand::Start,
            ..*settings
        };
        if settings.timestamp == 0 {
            settings.timestamp = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        }
        info!(
            "Starting logger: {} every {}ms",
            settings.mode, settings.update_interval
        );
        self.set_settings(&settings)
    }

    /// Stop logging.
    pub fn stop_logger(&self) -> Result<()> {
        info!("Stopping logger");
        self.set_settings(&DataLoggerSettings::command(LoggerCommand::Stop))
    }

    /// Ask the device to send its logged samples as Reading notifications.
    pub fn fetch_samples(&self) -> Result<()> {
        self.set_settings(&DataLoggerSettings::command(LoggerCommand::Refresh))
    }

    /// Queue a read of the session metadata.
    pub fn read_metadata(&self) -> Result<()> {
        self.core.read(DATA_LOGGER_METADATA_UUID)
    }

    pub fn enable_metadata_notifications(&self) -> Result<()> {
        self.core.enable_notifications(DATA_LOGGER_METADATA_UUID)
    }

    pub fn disable_metadata_notifications(&self) -> Result<()> {
        self.core.disable_notifications(DATA_LOGGER_METADATA_UUID)
    }

    /// Receive sample batches as they are sent.
    pub fn enable_reading_notifications(&self) -> Result<()> {
        self.core.enable_notifications(DATA_LOGGER_READING_UUID)
    }

    pub fn disable_reading_notifications(&self) -> Result<()> {
        self.core.disable_notifications(DATA_LOGGER_READING_UUID)
    }

    /// Cached metadata.
    pub fn metadata(&self) -> Option<LoggerMetadata> {
        let value = self.core.value(&DATA_LOGGER_METADATA_UUID)?;
        LoggerMetadata::decode(&value, self.product).ok()
    }

    /// Range code for `request` on this product.
    pub fn range_for(&self, mode: LoggerMode, request: RangeRequest) -> RangeCode {
        ranges::range_for(self.product, mode.measurement_mode(), request)
    }

    /// Render a range code, e.g. `Up to 2V`.
    pub fn range_to_string(&self, mode: LoggerMode, range: RangeCode) -> Option<String> {
        ranges::range_to_string(self.product, mode.measurement_mode(), range)
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<DataLoggerEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DataLoggerEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }
}

impl PokitService for DataLoggerService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &[
            DATA_LOGGER_SETTINGS_UUID,
            DATA_LOGGER_METADATA_UUID,
            DATA_LOGGER_READING_UUID,
        ]
    }

    fn read_characteristics(&self) -> Result<()> {
        self.read_metadata()
    }

    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]) {
        match *characteristic {
            DATA_LOGGER_METADATA_UUID => {
                if let Ok(metadata) = LoggerMetadata::decode(value, self.product) {
                    debug!("Logger metadata: {:?}", metadata);
                    self.events.emit(DataLoggerEvent::MetadataRead(metadata));
                }
            }
            DATA_LOGGER_READING_UUID => {
                if let Ok(samples) = decode_samples("logger samples", value) {
                    debug!("Logger samples: {}", samples.len());
                    self.events.emit(DataLoggerEvent::SamplesRead(samples));
                }
            }
            _ => warn!("Unexpected value for Data Logger characteristic: {}", characteristic),
        }
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        match *characteristic {
            DATA_LOGGER_SETTINGS_UUID => self.events.emit(DataLoggerEvent::SettingsWritten),
            _ => warn!("Unknown characteristic written for Data Logger: {}", characteristic),
        }
    }

    fn characteristic_changed(&self, characteristic: &Uuid, value: &[u8]) {
        self.characteristic_read(characteristic, value);
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(DataLoggerEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::*;
    use pretty_assertions::assert_eq;

    fn metadata_bytes(product: ProductVariant) -> Vec<u8> {
        let mut bytes = vec![1];
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2]);
        if product.is_pro() {
            bytes.extend_from_slice(&5_000u32.to_le_bytes());
        } else {
            bytes.extend_from_slice(&5u16.to_le_bytes());
        }
        bytes.extend_from_slice(&100u16.to_le_bytes());
        bytes.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        bytes
    }

    fn logger(product: ProductVariant) -> (Arc<FakeTransport>, DataLoggerService) {
        let svc = DATA_LOGGER_SERVICE_UUID;
        let transport = FakeTransport::new(
            vec![svc],
            &[
                (svc, DATA_LOGGER_SETTINGS_UUID),
                (svc, DATA_LOGGER_METADATA_UUID),
                (svc, DATA_LOGGER_READING_UUID),
            ],
        );
        let service = DataLoggerService::new(transport.clone(), product);
        (transport, service)
    }

    #[test]
    fn test_settings_encoding_per_product() {
        let settings = DataLoggerSettings {
            command: LoggerCommand::Start,
            mode: LoggerMode::AcVoltage,
            range: RangeCode(2),
            update_interval: 90_000,
            timestamp: 0x01020304,
        };

        let meter = settings.encode(ProductVariant::PokitMeter);
        assert_eq!(meter.len(), DataLoggerSettings::METER_SIZE);
        assert_eq!(&meter[..], &[0, 0, 0, 2, 2, 90, 0, 4, 3, 2, 1]);

        let pro = settings.encode(ProductVariant::PokitPro);
        assert_eq!(pro.len(), DataLoggerSettings::PRO_SIZE);
        assert_eq!(&pro[5..9], &90_000u32.to_le_bytes()[..]);
    }

    #[test]
    fn test_metadata_decoding_per_product() {
        for product in [ProductVariant::PokitMeter, ProductVariant::PokitPro] {
            let metadata = LoggerMetadata::decode(&metadata_bytes(product), product).unwrap();
            assert_eq!(metadata.status, LoggerStatus::Sampling);
            assert_eq!(metadata.mode, LoggerMode::DcVoltage);
            assert_eq!(metadata.range, RangeCode(2));
            assert_eq!(metadata.update_interval, 5_000);
            assert_eq!(metadata.number_of_samples, 100);
            assert_eq!(
                metadata.start_time().map(|t| t.timestamp()),
                Some(1_700_000_000)
            );
            assert_eq!(metadata.scale_samples(&[2, -4]), vec![1.0, -2.0]);
        }

        // Meter-sized payloads are too short for the Pro.
        assert!(LoggerMetadata::decode(
            &metadata_bytes(ProductVariant::PokitMeter),
            ProductVariant::PokitPro
        )
        .is_err());
    }

    #[test]
    fn test_commands() {
        let (transport, logger) = logger(ProductVariant::PokitPro);
        logger.start_logger(&DataLoggerSettings::default()).unwrap();
        logger.stop_logger().unwrap();
        logger.fetch_samples().unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].1[0], LoggerCommand::Start as u8);
        assert_ne!(&writes[0].1[9..13], &[0, 0, 0, 0]);
        assert_eq!(writes[1].1[0], LoggerCommand::Stop as u8);
        assert_eq!(writes[2].1[0], LoggerCommand::Refresh as u8);
    }

    #[tokio::test]
    async fn test_events() {
        let (_, logger) = logger(ProductVariant::PokitMeter);
        let svc = DATA_LOGGER_SERVICE_UUID;
        let mut rx = logger.subscribe();

        logger.handle_event(&notification(
            svc,
            DATA_LOGGER_METADATA_UUID,
            &metadata_bytes(ProductVariant::PokitMeter),
        ));
        logger.handle_event(&notification(svc, DATA_LOGGER_READING_UUID, &[1, 0, 0xFF, 0xFF]));
        logger.handle_event(&write_complete(svc, DATA_LOGGER_SETTINGS_UUID, &[]));

        assert!(matches!(rx.recv().await.unwrap(), DataLoggerEvent::MetadataRead(_)));
        assert_eq!(rx.recv().await.unwrap(), DataLoggerEvent::SamplesRead(vec![1, -1]));
        assert_eq!(rx.recv().await.unwrap(), DataLoggerEvent::SettingsWritten);
        assert_eq!(logger.metadata().map(|m| m.number_of_samples), Some(100));
    }
}
