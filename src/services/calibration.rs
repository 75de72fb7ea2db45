//! Calibration service.
//!
//! The device exposes a single write-only characteristic taking the current
//! ambient temperature. There is nothing to read back.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{CALIBRATION_SERVICE_UUID, CALIBRATION_TEMPERATURE_UUID};
use crate::codec::encode_f32;
use crate::error::Result;
use crate::service::{CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

/// Typed events raised by [`CalibrationService`].
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    /// The device accepted a temperature calibration.
    TemperatureCalibrated,
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// The Pokit Calibration service.
pub struct CalibrationService {
    core: ServiceCore,
    events: EventChannel<CalibrationEvent>,
}

impl CalibrationService {
    /// Create the service on `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            core: ServiceCore::new("Calibration", CALIBRATION_SERVICE_UUID, transport),
            events: EventChannel::new(),
        }
    }

    /// Queue a calibration against the given ambient temperature, in °C.
    pub fn calibrate_temperature(&self, ambient_temperature: f32) -> Result<()> {
        debug!("Calibrating temperature to {}°C", ambient_temperature);
        self.core
            .write(CALIBRATION_TEMPERATURE_UUID, encode_f32(ambient_temperature))
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<CalibrationEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&CalibrationEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }
}

impl PokitService for CalibrationService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &[CALIBRATION_TEMPERATURE_UUID]
    }

    fn read_characteristics(&self) -> Result<()> {
        debug!("Ignoring read request; Calibration has no readable characteristics");
        Ok(())
    }

    fn characteristic_read(&self, characteristic: &Uuid, _value: &[u8]) {
        warn!(
            "Characteristic read event for Calibration, but no characteristics are readable: {}",
            characteristic
        );
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        match *characteristic {
            CALIBRATION_TEMPERATURE_UUID => {
                self.events.emit(CalibrationEvent::TemperatureCalibrated)
            }
            _ => warn!("Unknown characteristic written for Calibration: {}", characteristic),
        }
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(CalibrationEvent::Error(error.clone()));
    }
}
