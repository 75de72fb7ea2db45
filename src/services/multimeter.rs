//! Multimeter service: measurement configuration and streaming readings.
//!
//! A typical session writes the settings, waits for
//! [`MultimeterEvent::SettingsWritten`], then enables reading notifications:
//!
//! ```rust,no_run
//! # use pokit_ble::services::multimeter::{MultimeterEvent, MultimeterService};
//! # use pokit_ble::{MeasurementMode, RangeRequest};
//! # async fn demo(meter: &MultimeterService) -> pokit_ble::Result<()> {
//! let mut events = meter.subscribe();
//! meter.configure(MeasurementMode::DcVoltage, RangeRequest::Auto, 1000)?;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         MultimeterEvent::SettingsWritten => meter.begin_streaming()?,
//!         MultimeterEvent::ReadingRead(reading) => println!("{}", reading.value),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{MULTIMETER_READING_UUID, MULTIMETER_SERVICE_UUID, MULTIMETER_SETTINGS_UUID};
use crate::codec::{check_size, DecodeError};
use crate::error::Result;
use crate::modes::MeasurementMode;
use crate::products::ProductVariant;
use crate::ranges::{self, RangeCode, RangeRequest};
use crate::service::{CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

/// Outgoing multimeter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultimeterSettings {
    /// Quantity to measure.
    pub mode: MeasurementMode,
    /// Range to measure in; only meaningful together with `mode`.
    pub range: RangeCode,
    /// Interval between readings, in milliseconds.
    pub update_interval: u32,
}

impl MultimeterSettings {
    /// Encoded size in bytes.
    pub const SIZE: usize = 6;

    /// Default interval between readings, in milliseconds.
    pub const DEFAULT_UPDATE_INTERVAL: u32 = 1000;

    /// Encode for the Settings characteristic.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.mode.to_raw());
        buf.put_u8(self.range.to_raw());
        buf.put_u32_le(self.update_interval);
        buf.freeze()
    }
}

impl Default for MultimeterSettings {
    fn default() -> Self {
        Self {
            mode: MeasurementMode::DcVoltage,
            range: RangeCode::AUTO,
            update_interval: Self::DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// Reading status, interpreted according to the reading's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeterStatus {
    /// Ranged modes: the range is fixed.
    AutoRangeOff,
    /// Ranged modes: the device is auto-ranging.
    AutoRangeOn,
    /// Continuity mode: open circuit.
    NoContinuity,
    /// Continuity mode: closed circuit.
    Continuity,
    /// Diode and temperature modes.
    Ok,
    /// The device reported an error (raw `0xFF`, in any mode).
    Error,
}

impl MeterStatus {
    /// Raw value meaning "error" in every mode.
    pub const RAW_ERROR: u8 = 0xFF;

    /// Interpret a raw status byte for `mode`.
    pub fn from_raw(value: u8, mode: MeasurementMode) -> Self {
        if value == Self::RAW_ERROR {
            return Self::Error;
        }
        match mode {
            MeasurementMode::Continuity if value == 0 => Self::NoContinuity,
            MeasurementMode::Continuity => Self::Continuity,
            _ if mode.is_ranged() && value == 0 => Self::AutoRangeOff,
            _ if mode.is_ranged() => Self::AutoRangeOn,
            _ => Self::Ok,
        }
    }
}

impl fmt::Display for MeterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AutoRangeOff => "Auto Range Off",
            Self::AutoRangeOn => "Auto Range On",
            Self::NoContinuity => "No continuity",
            Self::Continuity => "Continuity",
            Self::Ok => "Ok",
            Self::Error => "Error",
        };
        f.write_str(text)
    }
}

/// One decoded multimeter sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Mode the device measured in.
    pub mode: MeasurementMode,
    /// Range or continuity status, interpreted for `mode`.
    pub status: MeterStatus,
    /// Range code in effect.
    pub range: RangeCode,
    /// Measured value, in the mode's unit.
    pub value: f32,
}

impl Reading {
    /// Encoded size in bytes.
    pub const SIZE: usize = 7;

    /// Decode from a Reading characteristic payload.
    pub fn decode(value: &[u8]) -> std::result::Result<Self, DecodeError> {
        check_size("reading", value, Self::SIZE, Self::SIZE)?;
        let mut buf = value;
        let raw_mode = buf.get_u8();
        let mode = MeasurementMode::from_raw(raw_mode).ok_or(DecodeError::InvalidValue {
            label: "reading mode",
            value: raw_mode,
        })?;
        let status = MeterStatus::from_raw(buf.get_u8(), mode);
        let range = RangeCode(buf.get_u8());
        let value = buf.get_f32_le();

        Ok(Self {
            mode,
            status,
            range,
            value,
        })
    }

    /// Unit symbol for this reading's mode.
    pub fn unit(&self) -> Option<&'static str> {
        self.mode.unit()
    }
}

/// Typed events raised by [`MultimeterService`].
#[derive(Debug, Clone, PartialEq)]
pub enum MultimeterEvent {
    /// The device accepted new settings; notifications may now be enabled.
    SettingsWritten,
    /// A reading was read or notified.
    ReadingRead(Reading),
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// The Pokit Multimeter service.
pub struct MultimeterService {
    core: ServiceCore,
    product: ProductVariant,
    events: EventChannel<MultimeterEvent>,
}

impl MultimeterService {
    /// Create the service for `product` on `transport`.
    pub fn new(transport: Arc<dyn Transport>, product: ProductVariant) -> Self {
        Self {
            core: ServiceCore::new("Multimeter", MULTIMETER_SERVICE_UUID, transport),
            product,
            events: EventChannel::new(),
        }
    }

    /// Product whose range tables this service uses.
    pub fn product(&self) -> ProductVariant {
        self.product
    }

    /// Resolve `request` and write the resulting settings.
    ///
    /// Returns the settings that were queued. Success means the write was
    /// enqueued, not that the device accepted it; wait for
    /// [`MultimeterEvent::SettingsWritten`] before streaming.
    pub fn configure(
        &self,
        mode: MeasurementMode,
        request: RangeRequest,
        update_interval: u32,
    ) -> Result<MultimeterSettings> {
        let settings = MultimeterSettings {
            mode,
            range: self.range_for(mode, request),
            update_interval,
        };
        self.set_settings(&settings)?;
        Ok(settings)
    }

    /// Write `settings` to the device.
    pub fn set_settings(&self, settings: &MultimeterSettings) -> Result<()> {
        debug!(
            "Configuring {}: {} at {}, every {}ms",
            self.product,
            settings.mode,
            self.range_to_string(settings.mode, settings.range)
                .unwrap_or_else(|| format!("range {}", settings.range.0)),
            settings.update_interval
        );
        self.core.write(MULTIMETER_SETTINGS_UUID, settings.encode())
    }

    /// Queue a single read of the Reading characteristic.
    pub fn read_reading(&self) -> Result<()> {
        self.core.read(MULTIMETER_READING_UUID)
    }

    /// Start streaming readings.
    pub fn begin_streaming(&self) -> Result<()> {
        self.enable_reading_notifications()
    }

    /// Stop streaming readings.
    pub fn end_streaming(&self) -> Result<()> {
        self.disable_reading_notifications()
    }

    /// Receive readings at the configured interval.
    pub fn enable_reading_notifications(&self) -> Result<()> {
        self.core.enable_notifications(MULTIMETER_READING_UUID)
    }

    pub fn disable_reading_notifications(&self) -> Result<()> {
        self.core.disable_notifications(MULTIMETER_READING_UUID)
    }

    /// Most recent reading.
    pub fn reading(&self) -> Option<Reading> {
        let value = self.core.value(&MULTIMETER_READING_UUID)?;
        Reading::decode(&value).ok()
    }

    /// Range code for `request` on this product.
    pub fn range_for(&self, mode: MeasurementMode, request: RangeRequest) -> RangeCode {
        ranges::range_for(self.product, mode, request)
    }

    /// Render a range code, e.g. `Up to 2V`.
    pub fn range_to_string(&self, mode: MeasurementMode, range: RangeCode) -> Option<String> {
        ranges::range_to_string(self.product, mode, range)
    }

    /// Unit symbol for `mode`.
    pub fn unit(mode: MeasurementMode) -> Option<&'static str> {
        mode.unit()
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<MultimeterEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&MultimeterEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }
}

impl PokitService for MultimeterService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &[MULTIMETER_SETTINGS_UUID, MULTIMETER_READING_UUID]
    }

    fn read_characteristics(&self) -> Result<()> {
        self.read_reading()
    }

    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]) {
        match *characteristic {
            MULTIMETER_READING_UUID => {
                if let Ok(reading) = Reading::decode(value) {
                    debug!(
                        "Reading: {} {} ({}, {})",
                        reading.value,
                        reading.unit().unwrap_or_default(),
                        reading.status,
                        self.range_to_string(reading.mode, reading.range)
                            .unwrap_or_default()
                    );
                    self.events.emit(MultimeterEvent::ReadingRead(reading));
                }
            }
            MULTIMETER_SETTINGS_UUID => {
                warn!("Settings characteristic is write-only, but got read response");
            }
            _ => warn!("Unknown characteristic read for Multimeter: {}", characteristic),
        }
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        match *characteristic {
            MULTIMETER_SETTINGS_UUID => self.events.emit(MultimeterEvent::SettingsWritten),
            MULTIMETER_READING_UUID => {
                warn!("Reading characteristic is read/notify, but somehow written");
            }
            _ => warn!("Unknown characteristic written for Multimeter: {}", characteristic),
        }
    }

    fn characteristic_changed(&self, characteristic: &Uuid, value: &[u8]) {
        match *characteristic {
            MULTIMETER_READING_UUID => self.characteristic_read(characteristic, value),
            _ => warn!("Unexpected notification for Multimeter: {}", characteristic),
        }
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(MultimeterEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::{MockTransport, TransportEvent};
    use crate::service::testing::*;
    use btleplug::api::{CharPropFlags, WriteType};
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    fn reading_bytes(mode: u8, status: u8, range: u8, value: f32) -> Vec<u8> {
        let mut bytes = vec![mode, status, range];
        bytes.extend_from_slice(&value.to_le_bytes());
        bytes
    }

    fn meter(product: ProductVariant) -> (Arc<FakeTransport>, MultimeterService) {
        let transport = FakeTransport::new(
            vec![MULTIMETER_SERVICE_UUID],
            &[
                (MULTIMETER_SERVICE_UUID, MULTIMETER_SETTINGS_UUID),
                (MULTIMETER_SERVICE_UUID, MULTIMETER_READING_UUID),
            ],
        );
        let service = MultimeterService::new(transport.clone(), product);
        (transport, service)
    }

    #[test]
    fn test_settings_encoding() {
        let settings = MultimeterSettings {
            mode: MeasurementMode::AcCurrent,
            range: RangeCode(3),
            update_interval: 500,
        };
        assert_eq!(&settings.encode()[..], &[4, 3, 0xF4, 0x01, 0x00, 0x00]);
        assert_eq!(
            &MultimeterSettings::default().encode()[..],
            &[1, 0, 0xE8, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn test_status_depends_on_mode() {
        use MeasurementMode::*;
        assert_eq!(MeterStatus::from_raw(1, DcVoltage), MeterStatus::AutoRangeOn);
        assert_eq!(MeterStatus::from_raw(0, Resistance), MeterStatus::AutoRangeOff);
        assert_eq!(MeterStatus::from_raw(1, Continuity), MeterStatus::Continuity);
        assert_eq!(MeterStatus::from_raw(0, Continuity), MeterStatus::NoContinuity);
        assert_eq!(MeterStatus::from_raw(1, Temperature), MeterStatus::Ok);
        assert_eq!(MeterStatus::from_raw(0, Diode), MeterStatus::Ok);
        for mode in MeasurementMode::ALL {
            assert_eq!(MeterStatus::from_raw(0xFF, mode), MeterStatus::Error);
        }
        assert_eq!(MeterStatus::AutoRangeOn.to_string(), "Auto Range On");
        assert_eq!(MeterStatus::NoContinuity.to_string(), "No continuity");
    }

    #[test]
    fn test_reading_decode_rejects_bad_payloads() {
        assert!(matches!(
            Reading::decode(&[1, 0, 0]),
            Err(DecodeError::SizeMismatch { .. })
        ));
        assert_eq!(
            Reading::decode(&reading_bytes(42, 0, 0, 1.0)),
            Err(DecodeError::InvalidValue {
                label: "reading mode",
                value: 42
            })
        );
    }

    #[tokio::test]
    async fn test_configure_then_stream() {
        let (transport, meter) = meter(ProductVariant::PokitMeter);
        let mut rx = meter.subscribe();

        let settings = meter
            .configure(MeasurementMode::DcVoltage, RangeRequest::Auto, 1000)
            .unwrap();
        assert_eq!(settings.range, RangeCode::AUTO);

        meter.handle_event(&write_complete(
            MULTIMETER_SERVICE_UUID,
            MULTIMETER_SETTINGS_UUID,
            &settings.encode(),
        ));
        assert_eq!(rx.recv().await.unwrap(), MultimeterEvent::SettingsWritten);

        assert_ok!(meter.begin_streaming());
        meter.handle_event(&notification(
            MULTIMETER_SERVICE_UUID,
            MULTIMETER_READING_UUID,
            &reading_bytes(1, 0x01, 0x02, 3.30),
        ));

        let MultimeterEvent::ReadingRead(reading) = rx.recv().await.unwrap() else {
            panic!("expected a reading");
        };
        assert_eq!(reading.mode, MeasurementMode::DcVoltage);
        assert_eq!(reading.status.to_string(), "Auto Range On");
        assert_eq!(reading.value, 3.30);
        assert_eq!(reading.unit(), Some("Vdc"));
        assert_eq!(
            meter.range_to_string(reading.mode, reading.range).as_deref(),
            Some("Up to 2V")
        );
        assert_eq!(meter.reading(), Some(reading));

        assert_eq!(
            transport.calls(),
            vec![
                Call::Write(
                    MULTIMETER_SERVICE_UUID,
                    MULTIMETER_SETTINGS_UUID,
                    settings.encode(),
                    WriteType::WithResponse,
                ),
                Call::Enable(MULTIMETER_SERVICE_UUID, MULTIMETER_READING_UUID),
            ]
        );
    }

    #[test]
    fn test_configure_resolves_range_per_product() {
        let (_, meter_svc) = meter(ProductVariant::PokitMeter);
        let (_, pro_svc) = meter(ProductVariant::PokitPro);
        let request = RangeRequest::AtLeast(0.28);

        let meter_settings = meter_svc
            .configure(MeasurementMode::DcVoltage, request, 1000)
            .unwrap();
        let pro_settings = pro_svc
            .configure(MeasurementMode::DcVoltage, request, 1000)
            .unwrap();
        assert_eq!(meter_settings.range, RangeCode(1));
        assert_eq!(pro_settings.range, RangeCode(2));
    }

    #[test]
    fn test_configure_rejected_when_not_writable() {
        let mut mock = MockTransport::new();
        mock.expect_properties()
            .return_const(Some(CharPropFlags::READ));
        mock.expect_enqueue_write().never();

        let meter = MultimeterService::new(Arc::new(mock), ProductVariant::PokitPro);
        assert!(meter.set_settings(&MultimeterSettings::default()).is_err());
    }

    #[tokio::test]
    async fn test_rejected_subscription_is_reported() {
        let (_, meter) = meter(ProductVariant::PokitMeter);
        let mut rx = meter.subscribe();

        assert_ok!(meter.begin_streaming());
        meter.handle_event(&TransportEvent::SubscribeFailed {
            service: MULTIMETER_SERVICE_UUID,
            characteristic: MULTIMETER_READING_UUID,
            reason: "Insufficient authentication".to_string(),
        });

        let expected = ServiceError::NotificationError {
            characteristic: MULTIMETER_READING_UUID,
            reason: "Insufficient authentication".to_string(),
        };
        assert_eq!(rx.recv().await.unwrap(), MultimeterEvent::Error(expected.clone()));
        assert_eq!(meter.core().last_error(), Some(expected));
    }

    #[tokio::test]
    async fn test_bad_notification_does_not_stop_dispatch() {
        let (_, meter) = meter(ProductVariant::PokitPro);
        let mut rx = meter.subscribe();

        meter.handle_event(&notification(MULTIMETER_SERVICE_UUID, MULTIMETER_READING_UUID, &[1, 2]));
        meter.handle_event(&notification(MULTIMETER_SERVICE_UUID, Uuid::from_u128(7), &[1]));
        meter.handle_event(&TransportEvent::WriteFailed {
            service: MULTIMETER_SERVICE_UUID,
            characteristic: MULTIMETER_SETTINGS_UUID,
            reason: "Device rejected write".to_string(),
        });
        meter.handle_event(&notification(
            MULTIMETER_SERVICE_UUID,
            MULTIMETER_READING_UUID,
            &reading_bytes(7, 1, 0, 0.5),
        ));

        assert!(matches!(rx.recv().await.unwrap(), MultimeterEvent::Error(_)));
        let MultimeterEvent::ReadingRead(reading) = rx.recv().await.unwrap() else {
            panic!("expected a reading");
        };
        assert_eq!(reading.status, MeterStatus::Continuity);
    }
}
