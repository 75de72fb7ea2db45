// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # pokit-ble
//!
//! A cross-platform Rust library for talking to Pokit Meter and Pokit Pro
//! multimeters over Bluetooth Low Energy.
//!
//! The crate is the protocol layer: it encodes settings, decodes readings,
//! and interprets range codes per product. The radio session sits behind the
//! [`Transport`] trait; [`PeripheralTransport`] implements it on `btleplug`.
//!
//! ## Features
//!
//! - **Multimeter**: configure mode, range and interval; stream readings
//! - **Data Logger**: start, stop and download on-device logs
//! - **DSO**: triggered or free-running oscilloscope captures
//! - **Status**: battery, firmware, name, LED, torch and button
//! - **Calibration**: temperature calibration
//! - **Range Tables**: per-product range selection and rendering
//! - **Discovery**: find nearby Pokit devices and identify the product
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pokit_ble::{MeasurementMode, PeripheralTransport, PokitDevice, RangeRequest, Result};
//! use std::sync::Arc;
//!
//! # async fn demo(peripheral: btleplug::platform::Peripheral) -> Result<()> {
//! let (transport, events) = PeripheralTransport::new(peripheral);
//! transport.connect().await?;
//!
//! let device = Arc::new(PokitDevice::new(Arc::new(transport))?);
//! let meter = device.multimeter();
//! let mut readings = meter.subscribe();
//!
//! tokio::spawn({
//!     let device = device.clone();
//!     async move { device.run(events).await }
//! });
//!
//! meter.configure(MeasurementMode::DcVoltage, RangeRequest::Auto, 1000)?;
//! while let Ok(event) = readings.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Notes
//!
//! Radio access goes through `btleplug`, so its platform requirements apply:
//! a Bluetooth usage description in the app bundle on macOS, a running BlueZ
//! daemon (and usually membership of the `bluetooth` group) on Linux, and
//! Windows 10 or later on Windows.
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize`/`Deserialize` for readings, settings, metadata and status types

// Public modules
pub mod ble;
pub mod codec;
pub mod device;
pub mod error;
pub mod modes;
pub mod products;
pub mod ranges;
pub mod service;
pub mod services;
pub mod utils;

// Re-exports for convenience
pub use ble::peripheral::{ConnectionState, PeripheralTransport};
pub use ble::scanner::{PokitDiscoveryEvent, PokitScanner};
pub use ble::transport::{Transport, TransportEvent};
pub use ble::uuids::{characteristic_to_string, service_to_string};
pub use codec::DecodeError;
pub use device::PokitDevice;
pub use error::{Error, Result};
pub use modes::MeasurementMode;
pub use products::ProductVariant;
pub use ranges::{range_for, range_to_string, RangeCode, RangeRequest};
pub use service::{CallbackHandle, PokitService, ServiceError};

// Re-export commonly used types from submodules
pub use services::{
    CalibrationEvent, CalibrationService, DataLoggerEvent, DataLoggerService, DataLoggerSettings,
    DeviceInfo, DeviceInfoEvent, DeviceInfoService, DsoEvent, DsoService, DsoSettings,
    GenericAccessEvent, GenericAccessService, MeterStatus, MultimeterEvent, MultimeterService,
    MultimeterSettings, Reading, StatusEvent, StatusService,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<PokitDevice>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Reading>();
        let _ = std::any::TypeId::of::<MultimeterSettings>();
        let _ = std::any::TypeId::of::<RangeCode>();
        let _ = std::any::TypeId::of::<ProductVariant>();
    }

    #[test]
    fn test_range_helpers_exported() {
        assert_eq!(
            range_to_string(ProductVariant::PokitMeter, MeasurementMode::DcVoltage, RangeCode(1))
                .as_deref(),
            Some("Up to 300mV")
        );
    }
}
