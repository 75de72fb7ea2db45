//! Device facade: one connection, many lazily-created services.
//!
//! [`PokitDevice`] owns the protocol services bound to a single
//! [`Transport`] and is the serialized dispatch point for that connection's
//! events: [`PokitDevice::run`] takes events off the transport's channel one
//! at a time and hands each to the service it belongs to.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{Transport, TransportEvent};
use crate::ble::uuids::{
    service_to_string, CALIBRATION_SERVICE_UUID, DATA_LOGGER_SERVICE_UUID,
    DEVICE_INFO_SERVICE_UUID, DSO_SERVICE_UUID, GENERIC_ACCESS_SERVICE_UUID,
    MULTIMETER_SERVICE_UUID,
};
use crate::error::{Error, Result};
use crate::products::ProductVariant;
use crate::service::PokitService;
use crate::services::{
    CalibrationService, DataLoggerService, DeviceInfoService, DsoService, GenericAccessService,
    MultimeterService, StatusService,
};

type Slot<T> = RwLock<Option<Arc<T>>>;

/// A connected Pokit device.
pub struct PokitDevice {
    /// Shared connection.
    transport: Arc<dyn Transport>,
    /// Resolved once; selects range tables and the Status service UUID.
    product: ProductVariant,
    generic_access: Slot<GenericAccessService>,
    device_info: Slot<DeviceInfoService>,
    status: Slot<StatusService>,
    multimeter: Slot<MultimeterService>,
    data_logger: Slot<DataLoggerService>,
    dso: Slot<DsoService>,
    calibration: Slot<CalibrationService>,
}

impl PokitDevice {
    /// Create a facade over `transport`, identifying the product from the
    /// discovered services.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProduct`] if the device exposes neither Status
    /// service.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        let uuids = transport.service_uuids();
        let product = ProductVariant::from_service_uuids(&uuids).ok_or(Error::UnknownProduct)?;
        info!("Identified {}", product);
        Ok(Self::with_product(transport, product))
    }

    /// Create a facade over `transport` for a known product.
    pub fn with_product(transport: Arc<dyn Transport>, product: ProductVariant) -> Self {
        Self {
            transport,
            product,
            generic_access: RwLock::new(None),
            device_info: RwLock::new(None),
            status: RwLock::new(None),
            multimeter: RwLock::new(None),
            data_logger: RwLock::new(None),
            dso: RwLock::new(None),
            calibration: RwLock::new(None),
        }
    }

    /// Attached product.
    pub fn product(&self) -> ProductVariant {
        self.product
    }

    /// Check if the connection is ready for reads and writes.
    pub fn is_ready(&self) -> bool {
        self.transport.is_ready()
    }

    /// The Generic Access service, created on first use.
    ///
    /// Every accessor returns the same instance for the life of the device,
    /// and events are only routed to services that have been created.
    pub fn generic_access(&self) -> Arc<GenericAccessService> {
        get_or_init(&self.generic_access, || {
            GenericAccessService::new(self.transport.clone())
        })
    }

    /// The Device Information service.
    pub fn device_info(&self) -> Arc<DeviceInfoService> {
        get_or_init(&self.device_info, || DeviceInfoService::new(self.transport.clone()))
    }

    /// The product's Status service.
    pub fn status(&self) -> Arc<StatusService> {
        get_or_init(&self.status, || {
            StatusService::new(self.transport.clone(), self.product)
        })
    }

    /// The Multimeter service.
    pub fn multimeter(&self) -> Arc<MultimeterService> {
        get_or_init(&self.multimeter, || {
            MultimeterService::new(self.transport.clone(), self.product)
        })
    }

    /// The Data Logger service.
    pub fn data_logger(&self) -> Arc<DataLoggerService> {
        get_or_init(&self.data_logger, || {
            DataLoggerService::new(self.transport.clone(), self.product)
        })
    }

    /// The DSO service.
    pub fn dso(&self) -> Arc<DsoService> {
        get_or_init(&self.dso, || DsoService::new(self.transport.clone(), self.product))
    }

    /// The Calibration service.
    pub fn calibration(&self) -> Arc<CalibrationService> {
        get_or_init(&self.calibration, || {
            CalibrationService::new(self.transport.clone())
        })
    }

    /// Route one event to the service it belongs to.
    ///
    /// Events for services that have not been created, or that this crate
    /// does not know, are logged and dropped.
    pub fn dispatch(&self, event: &TransportEvent) {
        let uuid = event.service();
        trace!("Dispatching {:?}", event);

        match self.service_for(&uuid) {
            Some(service) => service.handle_event(event),
            None => match service_to_string(&uuid) {
                Some(name) => debug!("Dropping event for unused {} service", name),
                None => warn!("Dropping event for unknown service {}", uuid),
            },
        }
    }

    /// Dispatch events from `events` until the channel closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        debug!("Transport event channel closed");
    }

    fn service_for(&self, uuid: &Uuid) -> Option<Arc<dyn PokitService>> {
        match *uuid {
            GENERIC_ACCESS_SERVICE_UUID => constructed(&self.generic_access),
            DEVICE_INFO_SERVICE_UUID => constructed(&self.device_info),
            MULTIMETER_SERVICE_UUID => constructed(&self.multimeter),
            DATA_LOGGER_SERVICE_UUID => constructed(&self.data_logger),
            DSO_SERVICE_UUID => constructed(&self.dso),
            CALIBRATION_SERVICE_UUID => constructed(&self.calibration),
            u if u == self.product.status_service_uuid() => constructed(&self.status),
            _ => None,
        }
    }
}

fn get_or_init<T>(slot: &Slot<T>, init: impl FnOnce() -> T) -> Arc<T> {
    if let Some(service) = slot.read().as_ref() {
        return service.clone();
    }
    slot.write().get_or_insert_with(|| Arc::new(init())).clone()
}

fn constructed<T: PokitService + 'static>(slot: &Slot<T>) -> Option<Arc<dyn PokitService>> {
    let service = slot.read().clone()?;
    Some(service as Arc<dyn PokitService>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;
    use crate::modes::MeasurementMode;
    use crate::service::testing::*;
    use crate::services::multimeter::MultimeterEvent;

    fn reading(value: f32) -> Vec<u8> {
        let mut bytes = vec![MeasurementMode::DcVoltage.to_raw(), 1, 2];
        bytes.extend_from_slice(&value.to_le_bytes());
        bytes
    }

    #[test]
    fn test_product_resolution() {
        let pro = FakeTransport::new(vec![MULTIMETER_SERVICE_UUID, STATUS_SERVICE_UUID_PRO], &[]);
        assert_eq!(PokitDevice::new(pro).unwrap().product(), ProductVariant::PokitPro);

        let meter = FakeTransport::new(vec![STATUS_SERVICE_UUID_METER], &[]);
        assert_eq!(PokitDevice::new(meter).unwrap().product(), ProductVariant::PokitMeter);

        let other = FakeTransport::new(vec![DEVICE_INFO_SERVICE_UUID], &[]);
        assert!(matches!(PokitDevice::new(other), Err(Error::UnknownProduct)));
    }

    #[test]
    fn test_services_are_cached() {
        let device = PokitDevice::with_product(
            FakeTransport::new(vec![], &[]),
            ProductVariant::PokitMeter,
        );
        assert!(Arc::ptr_eq(&device.multimeter(), &device.multimeter()));
        assert!(Arc::ptr_eq(&device.status(), &device.status()));
        assert_eq!(device.status().service_uuid(), STATUS_SERVICE_UUID_METER);
        assert_eq!(device.multimeter().product(), ProductVariant::PokitMeter);
    }

    #[test]
    fn test_events_for_unconstructed_services_are_dropped() {
        let device = PokitDevice::with_product(
            FakeTransport::new(vec![], &[]),
            ProductVariant::PokitPro,
        );

        device.dispatch(&notification(MULTIMETER_SERVICE_UUID, MULTIMETER_READING_UUID, &reading(1.0)));
        device.dispatch(&notification(Uuid::from_u128(1), Uuid::from_u128(2), &[0]));

        let meter = device.multimeter();
        assert_eq!(meter.reading(), None);
    }

    #[tokio::test]
    async fn test_run_routes_events_in_order() {
        let device = Arc::new(PokitDevice::with_product(
            FakeTransport::new(vec![], &[]),
            ProductVariant::PokitPro,
        ));
        let meter = device.multimeter();
        let status = device.status();
        let mut rx = meter.subscribe();

        let (tx, events) = mpsc::unbounded_channel();
        for value in [1.0, 2.0, 3.0] {
            tx.send(notification(MULTIMETER_SERVICE_UUID, MULTIMETER_READING_UUID, &reading(value)))
                .unwrap();
        }
        // The Meter's Status service is not this device's.
        tx.send(read_complete(STATUS_SERVICE_UUID_METER, STATUS_UUID, &[0, 0, 0, 0, 0]))
            .unwrap();
        drop(tx);

        device.run(events).await;

        for expected in [1.0, 2.0, 3.0] {
            match rx.recv().await.unwrap() {
                MultimeterEvent::ReadingRead(reading) => assert_eq!(reading.value, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(status.status(), None);
    }

    #[tokio::test]
    async fn test_dispatcher_stops_once_every_sender_is_gone() {
        let device = Arc::new(PokitDevice::with_product(
            FakeTransport::new(vec![], &[]),
            ProductVariant::PokitMeter,
        ));
        let meter = device.multimeter();

        // One sender per worker task, as the btleplug transport hands out.
        let (tx, events) = mpsc::unbounded_channel();
        let worker = tx.clone();
        let listener = tx.clone();
        drop(tx);

        let dispatcher = tokio::spawn({
            let device = device.clone();
            async move { device.run(events).await }
        });

        listener
            .send(notification(MULTIMETER_SERVICE_UUID, MULTIMETER_READING_UUID, &reading(4.5)))
            .unwrap();
        drop(worker);
        drop(listener);

        tokio::time::timeout(std::time::Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert_eq!(meter.reading().map(|r| r.value), Some(4.5));
    }
}
