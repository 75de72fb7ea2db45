//! Common machinery shared by every Pokit service.
//!
//! Each service owns a [`ServiceCore`] holding the last known value of each
//! of its characteristics, and implements [`PokitService`] to turn raw
//! completion events into typed ones. Characteristics move from "unknown"
//! (no cached value) to "cached" on their first successful read or
//! notification, independently of each other.

use btleplug::api::{CharPropFlags, WriteType};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{Transport, TransportEvent};
use crate::ble::uuids::characteristic_to_string;
use crate::error::{Error, Result};

/// Capacity of each service's typed event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Device-reported failure of a queued operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServiceError {
    /// A characteristic read failed.
    CharacteristicReadError {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Description from the BLE stack.
        reason: String,
    },
    /// A characteristic write failed.
    CharacteristicWriteError {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Description from the BLE stack.
        reason: String,
    },
    /// The device refused to start or stop notifications.
    NotificationError {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Description from the BLE stack.
        reason: String,
    },
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CharacteristicReadError {
                characteristic,
                reason,
            } => write!(f, "Read of {} failed: {}", characteristic, reason),
            Self::CharacteristicWriteError {
                characteristic,
                reason,
            } => write!(f, "Write to {} failed: {}", characteristic, reason),
            Self::NotificationError {
                characteristic,
                reason,
            } => write!(f, "Notification setup for {} failed: {}", characteristic, reason),
        }
    }
}

/// Per-service state: transport handle and characteristic value cache.
pub struct ServiceCore {
    /// Human-readable service name, for logging.
    name: &'static str,
    /// Service UUID.
    service_uuid: Uuid,
    /// Shared connection.
    transport: Arc<dyn Transport>,
    /// Last known value of each characteristic.
    values: RwLock<HashMap<Uuid, Bytes>>,
    /// Most recent device-reported failure.
    last_error: RwLock<Option<ServiceError>>,
}

impl ServiceCore {
    /// Create a core for `service_uuid` on `transport`.
    pub fn new(name: &'static str, service_uuid: Uuid, transport: Arc<dyn Transport>) -> Self {
        Self {
            name,
            service_uuid,
            transport,
            values: RwLock::new(HashMap::new()),
            last_error: RwLock::new(None),
        }
    }

    /// Service name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Service UUID.
    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Last known value of a characteristic, without a round trip.
    pub fn value(&self, characteristic: &Uuid) -> Option<Bytes> {
        self.values.read().get(characteristic).cloned()
    }

    /// Most recent device-reported failure, if any.
    pub fn last_error(&self) -> Option<ServiceError> {
        self.last_error.read().clone()
    }

    /// Queue a read of `characteristic`.
    ///
    /// Fails immediately, without touching the transport queue, if the
    /// connection is not ready.
    pub fn read(&self, characteristic: Uuid) -> Result<()> {
        if !self.transport.is_ready() {
            debug!(
                "{}: not ready; not reading {}",
                self.name,
                self.describe(&characteristic)
            );
            return Err(Error::NotReady);
        }

        let properties = self.properties(characteristic)?;
        if !properties.contains(CharPropFlags::READ) {
            return Err(Error::NotReadable {
                uuid: characteristic.to_string(),
            });
        }

        trace!("{}: reading {}", self.name, self.describe(&characteristic));
        self.transport.enqueue_read(self.service_uuid, characteristic)
    }

    /// Queue a write (with response) of `value` to `characteristic`.
    pub fn write(&self, characteristic: Uuid, value: Bytes) -> Result<()> {
        self.write_with_type(characteristic, value, WriteType::WithResponse)
    }

    /// Queue a write (without response) of `value` to `characteristic`.
    pub fn write_without_response(&self, characteristic: Uuid, value: Bytes) -> Result<()> {
        self.write_with_type(characteristic, value, WriteType::WithoutResponse)
    }

    fn write_with_type(&self, characteristic: Uuid, value: Bytes, write_type: WriteType) -> Result<()> {
        let properties = self.properties(characteristic)?;
        if !properties.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            return Err(Error::NotWritable {
                uuid: characteristic.to_string(),
            });
        }

        debug!(
            "{}: writing {} bytes to {}: {:02X?}",
            self.name,
            value.len(),
            self.describe(&characteristic),
            &value[..]
        );
        self.transport
            .enqueue_write(self.service_uuid, characteristic, value, write_type)?;
        *self.last_error.write() = None;
        Ok(())
    }

    /// Queue a subscription to `characteristic`'s notifications.
    pub fn enable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.check_notifiable(characteristic)?;
        debug!(
            "{}: enabling notifications for {}",
            self.name,
            self.describe(&characteristic)
        );
        self.transport
            .enable_notifications(self.service_uuid, characteristic)
    }

    /// Queue an unsubscription from `characteristic`'s notifications.
    pub fn disable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.check_notifiable(characteristic)?;
        debug!(
            "{}: disabling notifications for {}",
            self.name,
            self.describe(&characteristic)
        );
        self.transport
            .disable_notifications(self.service_uuid, characteristic)
    }

    fn check_notifiable(&self, characteristic: Uuid) -> Result<()> {
        let properties = self.properties(characteristic)?;
        if !properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE) {
            return Err(Error::NotNotifiable {
                uuid: characteristic.to_string(),
            });
        }
        Ok(())
    }

    fn properties(&self, characteristic: Uuid) -> Result<CharPropFlags> {
        self.transport
            .properties(self.service_uuid, characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })
    }

    pub(crate) fn store(&self, characteristic: Uuid, value: Bytes) {
        self.values.write().insert(characteristic, value);
    }

    pub(crate) fn record_error(&self, error: ServiceError) {
        *self.last_error.write() = Some(error);
    }

    pub(crate) fn describe(&self, characteristic: &Uuid) -> String {
        match characteristic_to_string(&self.service_uuid, characteristic) {
            Some(name) => format!("{} ({})", name, characteristic),
            None => characteristic.to_string(),
        }
    }
}

/// Contract implemented by every Pokit service.
///
/// The default [`handle_event`](PokitService::handle_event) drops events for
/// characteristics the service does not recognise, caches values, and then
/// hands the raw payload to the service-specific hooks.
pub trait PokitService: Send + Sync {
    /// The service's core.
    fn core(&self) -> &ServiceCore;

    /// Characteristics this service understands.
    fn characteristics(&self) -> &'static [Uuid];

    /// Queue reads of every readable characteristic.
    ///
    /// All reads are attempted; the first failure is returned.
    fn read_characteristics(&self) -> Result<()>;

    /// A read completed.
    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]);

    /// A write completed.
    fn characteristic_written(&self, characteristic: &Uuid, value: &[u8]);

    /// A notification arrived.
    fn characteristic_changed(&self, characteristic: &Uuid, _value: &[u8]) {
        warn!(
            "{}: unexpected notification from {}",
            self.core().name(),
            self.core().describe(characteristic)
        );
    }

    /// A queued operation failed on the device.
    fn characteristic_failed(&self, _error: &ServiceError) {}

    /// Service UUID.
    fn service_uuid(&self) -> Uuid {
        self.core().service_uuid()
    }

    /// Route one transport event to the hooks above.
    fn handle_event(&self, event: &TransportEvent) {
        let core = self.core();
        let characteristic = event.characteristic();

        if !self.characteristics().contains(&characteristic) {
            warn!(
                "{}: ignoring event for unknown characteristic {}",
                core.name(),
                characteristic
            );
            return;
        }

        match event {
            TransportEvent::ReadComplete { value, .. } => {
                core.store(characteristic, value.clone());
                self.characteristic_read(&characteristic, value);
            }
            TransportEvent::WriteComplete { value, .. } => {
                self.characteristic_written(&characteristic, value);
            }
            TransportEvent::Notification { value, .. } => {
                core.store(characteristic, value.clone());
                self.characteristic_changed(&characteristic, value);
            }
            TransportEvent::ReadFailed { reason, .. } => {
                let error = ServiceError::CharacteristicReadError {
                    characteristic,
                    reason: reason.clone(),
                };
                warn!("{}: {}", core.name(), error);
                core.record_error(error.clone());
                self.characteristic_failed(&error);
            }
            TransportEvent::WriteFailed { reason, .. } => {
                let error = ServiceError::CharacteristicWriteError {
                    characteristic,
                    reason: reason.clone(),
                };
                warn!("{}: {}", core.name(), error);
                core.record_error(error.clone());
                self.characteristic_failed(&error);
            }
            TransportEvent::SubscribeFailed { reason, .. } => {
                let error = ServiceError::NotificationError {
                    characteristic,
                    reason: reason.clone(),
                };
                warn!("{}: {}", core.name(), error);
                core.record_error(error.clone());
                self.characteristic_failed(&error);
            }
        }
    }
}

/// Queue reads of several characteristics, attempting all of them.
pub(crate) fn read_all(core: &ServiceCore, characteristics: &[Uuid]) -> Result<()> {
    let mut first_error = None;
    for characteristic in characteristics {
        if let Err(e) = core.read(*characteristic) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Broadcast channel for one service's typed events.
pub(crate) struct EventChannel<T> {
    tx: broadcast::Sender<T>,
    callback_counter: AtomicU64,
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub(crate) fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        spawn_callback(callback_id, self.tx.subscribe(), callback)
    }

    /// Broadcast `event`; having no subscribers is not an error.
    pub(crate) fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

/// Spawn a task invoking `callback` for each event on `rx`.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_callback<T, F>(id: u64, mut rx: broadcast::Receiver<T>, callback: F) -> CallbackHandle
where
    T: Clone + Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => callback(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Callback {} lagged; skipped {} events", id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    CallbackHandle::new(id, move || {
        handle.abort();
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport used by the service tests.

    use super::*;
    use parking_lot::Mutex;

    /// A queued operation as seen by [`FakeTransport`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Read(Uuid, Uuid),
        Write(Uuid, Uuid, Bytes, WriteType),
        Enable(Uuid, Uuid),
        Disable(Uuid, Uuid),
    }

    /// Transport that records calls and exposes every characteristic with
    /// configurable properties.
    pub struct FakeTransport {
        pub ready: Mutex<bool>,
        pub services: Vec<Uuid>,
        pub properties: Mutex<HashMap<(Uuid, Uuid), CharPropFlags>>,
        pub calls: Mutex<Vec<Call>>,
    }

    impl FakeTransport {
        /// A ready transport exposing `characteristics` with every property.
        pub fn new(services: Vec<Uuid>, characteristics: &[(Uuid, Uuid)]) -> Arc<Self> {
            let all = CharPropFlags::READ
                | CharPropFlags::WRITE
                | CharPropFlags::NOTIFY;
            Arc::new(Self {
                ready: Mutex::new(true),
                services,
                properties: Mutex::new(characteristics.iter().map(|k| (*k, all)).collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn set_properties(&self, service: Uuid, characteristic: Uuid, flags: CharPropFlags) {
            self.properties.lock().insert((service, characteristic), flags);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn writes(&self) -> Vec<(Uuid, Bytes)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Write(_, characteristic, value, _) => Some((characteristic, value)),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for FakeTransport {
        fn is_ready(&self) -> bool {
            *self.ready.lock()
        }

        fn service_uuids(&self) -> Vec<Uuid> {
            self.services.clone()
        }

        fn properties(&self, service: Uuid, characteristic: Uuid) -> Option<CharPropFlags> {
            self.properties.lock().get(&(service, characteristic)).copied()
        }

        fn enqueue_read(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
            self.calls.lock().push(Call::Read(service, characteristic));
            Ok(())
        }

        fn enqueue_write(
            &self,
            service: Uuid,
            characteristic: Uuid,
            value: Bytes,
            write_type: WriteType,
        ) -> Result<()> {
            self.calls
                .lock()
                .push(Call::Write(service, characteristic, value, write_type));
            Ok(())
        }

        fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
            self.calls.lock().push(Call::Enable(service, characteristic));
            Ok(())
        }

        fn disable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
            self.calls.lock().push(Call::Disable(service, characteristic));
            Ok(())
        }
    }

    pub fn read_complete(service: Uuid, characteristic: Uuid, value: &[u8]) -> TransportEvent {
        TransportEvent::ReadComplete {
            service,
            characteristic,
            value: Bytes::copy_from_slice(value),
        }
    }

    pub fn write_complete(service: Uuid, characteristic: Uuid, value: &[u8]) -> TransportEvent {
        TransportEvent::WriteComplete {
            service,
            characteristic,
            value: Bytes::copy_from_slice(value),
        }
    }

    pub fn notification(service: Uuid, characteristic: Uuid, value: &[u8]) -> TransportEvent {
        TransportEvent::Notification {
            service,
            characteristic,
            value: Bytes::copy_from_slice(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::ble::transport::MockTransport;
    use crate::ble::uuids::*;
    use tokio_test::{assert_err, assert_ok};

    const SERVICE: Uuid = GENERIC_ACCESS_SERVICE_UUID;

    /// Minimal service recording which hooks fired.
    struct Recorder {
        core: ServiceCore,
        seen: parking_lot::Mutex<Vec<String>>,
    }

    impl PokitService for Recorder {
        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn characteristics(&self) -> &'static [Uuid] {
            &[DEVICE_NAME_UUID, APPEARANCE_UUID]
        }

        fn read_characteristics(&self) -> Result<()> {
            read_all(&self.core, &[DEVICE_NAME_UUID, APPEARANCE_UUID])
        }

        fn characteristic_read(&self, _characteristic: &Uuid, value: &[u8]) {
            self.seen.lock().push(format!("read {}", value.len()));
        }

        fn characteristic_written(&self, _characteristic: &Uuid, value: &[u8]) {
            self.seen.lock().push(format!("written {}", value.len()));
        }

        fn characteristic_failed(&self, _error: &ServiceError) {
            self.seen.lock().push("failed".to_string());
        }
    }

    fn recorder(transport: Arc<dyn Transport>) -> Recorder {
        Recorder {
            core: ServiceCore::new("Recorder", SERVICE, transport),
            seen: parking_lot::Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_read_when_not_ready_never_enqueues() {
        let mut mock = MockTransport::new();
        mock.expect_is_ready().return_const(false);
        mock.expect_enqueue_read().never();

        let core = ServiceCore::new("Test", SERVICE, Arc::new(mock));
        assert!(matches!(core.read(DEVICE_NAME_UUID), Err(Error::NotReady)));
    }

    #[test]
    fn test_read_requires_readable_characteristic() {
        let transport = FakeTransport::new(vec![SERVICE], &[(SERVICE, DEVICE_NAME_UUID)]);
        transport.set_properties(SERVICE, DEVICE_NAME_UUID, CharPropFlags::WRITE);
        let core = ServiceCore::new("Test", SERVICE, transport.clone());

        assert!(matches!(core.read(DEVICE_NAME_UUID), Err(Error::NotReadable { .. })));
        assert!(matches!(
            core.read(APPEARANCE_UUID),
            Err(Error::CharacteristicNotFound { .. })
        ));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_write_requires_writable_characteristic() {
        let transport = FakeTransport::new(vec![SERVICE], &[(SERVICE, APPEARANCE_UUID)]);
        transport.set_properties(SERVICE, APPEARANCE_UUID, CharPropFlags::READ);
        let core = ServiceCore::new("Test", SERVICE, transport.clone());

        assert!(matches!(
            core.write(APPEARANCE_UUID, Bytes::from_static(&[0, 0])),
            Err(Error::NotWritable { .. })
        ));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_notifications_require_notify_or_indicate() {
        let transport = FakeTransport::new(vec![SERVICE], &[(SERVICE, DEVICE_NAME_UUID)]);
        transport.set_properties(SERVICE, DEVICE_NAME_UUID, CharPropFlags::READ | CharPropFlags::WRITE);
        let core = ServiceCore::new("Test", SERVICE, transport.clone());

        assert!(matches!(
            core.enable_notifications(DEVICE_NAME_UUID),
            Err(Error::NotNotifiable { .. })
        ));
        assert!(matches!(
            core.disable_notifications(DEVICE_NAME_UUID),
            Err(Error::NotNotifiable { .. })
        ));
        assert!(transport.calls().is_empty());

        transport.set_properties(SERVICE, DEVICE_NAME_UUID, CharPropFlags::INDICATE);
        assert_ok!(core.enable_notifications(DEVICE_NAME_UUID));
        assert_eq!(transport.calls(), vec![Call::Enable(SERVICE, DEVICE_NAME_UUID)]);
    }

    #[test]
    fn test_failed_enqueue_keeps_recorded_failure() {
        let mut mock = MockTransport::new();
        mock.expect_properties()
            .return_const(Some(CharPropFlags::WRITE));
        mock.expect_enqueue_write()
            .times(1)
            .returning(|_, _, _, _| Err(Error::NotConnected));

        let core = ServiceCore::new("Test", SERVICE, Arc::new(mock));
        let failure = ServiceError::CharacteristicWriteError {
            characteristic: DEVICE_NAME_UUID,
            reason: "rejected".to_string(),
        };
        core.record_error(failure.clone());

        assert_err!(core.write(DEVICE_NAME_UUID, Bytes::from_static(b"x")));
        assert_eq!(core.last_error(), Some(failure));
    }

    #[test]
    fn test_transport_rejection_is_returned() {
        let mut mock = MockTransport::new();
        mock.expect_properties()
            .return_const(Some(CharPropFlags::WRITE));
        mock.expect_enqueue_write()
            .times(1)
            .returning(|_, _, _, _| Err(Error::NotConnected));

        let core = ServiceCore::new("Test", SERVICE, Arc::new(mock));
        assert_err!(core.write(DEVICE_NAME_UUID, Bytes::from_static(b"x")));
    }

    #[test]
    fn test_events_populate_cache() {
        let transport = FakeTransport::new(vec![SERVICE], &[(SERVICE, DEVICE_NAME_UUID)]);
        let service = recorder(transport);

        assert_eq!(service.core().value(&DEVICE_NAME_UUID), None);
        service.handle_event(&read_complete(SERVICE, DEVICE_NAME_UUID, b"Pokit"));
        assert_eq!(
            service.core().value(&DEVICE_NAME_UUID),
            Some(Bytes::from_static(b"Pokit"))
        );

        service.handle_event(&notification(SERVICE, DEVICE_NAME_UUID, b"Pro"));
        assert_eq!(
            service.core().value(&DEVICE_NAME_UUID),
            Some(Bytes::from_static(b"Pro"))
        );
        assert_eq!(service.core().value(&APPEARANCE_UUID), None);
    }

    #[test]
    fn test_unknown_characteristic_is_dropped() {
        let transport = FakeTransport::new(vec![SERVICE], &[]);
        let service = recorder(transport);
        let unknown = Uuid::from_u128(0x1234);

        service.handle_event(&read_complete(SERVICE, unknown, &[1, 2, 3]));
        service.handle_event(&read_complete(SERVICE, DEVICE_NAME_UUID, &[1]));

        assert_eq!(service.core().value(&unknown), None);
        assert_eq!(*service.seen.lock(), vec!["read 1".to_string()]);
    }

    #[test]
    fn test_write_failure_is_recorded() {
        let transport = FakeTransport::new(vec![SERVICE], &[(SERVICE, DEVICE_NAME_UUID)]);
        let service = recorder(transport);

        service.handle_event(&TransportEvent::WriteFailed {
            service: SERVICE,
            characteristic: DEVICE_NAME_UUID,
            reason: "rejected".to_string(),
        });
        assert!(matches!(
            service.core().last_error(),
            Some(ServiceError::CharacteristicWriteError { .. })
        ));
        assert_eq!(*service.seen.lock(), vec!["failed".to_string()]);

        // A new write clears the recorded failure.
        assert_ok!(service.core().write(DEVICE_NAME_UUID, Bytes::from_static(b"x")));
        assert_eq!(service.core().last_error(), None);
    }

    #[test]
    fn test_read_all_attempts_every_characteristic() {
        let transport = FakeTransport::new(vec![SERVICE], &[(SERVICE, APPEARANCE_UUID)]);
        let service = recorder(transport.clone());

        assert!(service.read_characteristics().is_err());
        assert_eq!(transport.calls(), vec![Call::Read(SERVICE, APPEARANCE_UUID)]);
    }

    #[tokio::test]
    async fn test_callback_handle_stops_delivery() {
        let (tx, rx) = broadcast::channel::<u32>(4);
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = spawn_callback(7, rx, move |value| {
            let _ = seen_tx.send(*value);
        });
        assert_eq!(handle.id(), 7);

        tx.send(1).unwrap();
        assert_eq!(seen_rx.recv().await, Some(1));

        handle.unregister();
        tokio::task::yield_now().await;
        let _ = tx.send(2);
        assert_eq!(seen_rx.recv().await, None);
    }
}
