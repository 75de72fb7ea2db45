//! Generic Access service: device name and appearance.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::Transport;
use crate::ble::uuids::{APPEARANCE_UUID, DEVICE_NAME_UUID, GENERIC_ACCESS_SERVICE_UUID};
use crate::codec::{decode_string, decode_u16, encode_string};
use crate::error::Result;
use crate::service::{read_all, CallbackHandle, EventChannel, PokitService, ServiceCore, ServiceError};

/// Typed events raised by [`GenericAccessService`].
#[derive(Debug, Clone, PartialEq)]
pub enum GenericAccessEvent {
    /// Appearance code was read.
    AppearanceRead(u16),
    /// Device name was read.
    DeviceNameRead(String),
    /// A new device name was accepted by the device.
    DeviceNameWritten,
    /// A queued operation failed on the device.
    Error(ServiceError),
}

/// The standard Generic Access service.
pub struct GenericAccessService {
    core: ServiceCore,
    events: EventChannel<GenericAccessEvent>,
}

impl GenericAccessService {
    /// Maximum encoded length of a device name, in bytes.
    pub const MAX_NAME_LENGTH: usize = 11;

    /// Create the service on `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            core: ServiceCore::new("Generic Access", GENERIC_ACCESS_SERVICE_UUID, transport),
            events: EventChannel::new(),
        }
    }

    /// Queue a read of the appearance code.
    pub fn read_appearance(&self) -> Result<()> {
        self.core.read(APPEARANCE_UUID)
    }

    /// Queue a read of the device name.
    pub fn read_device_name(&self) -> Result<()> {
        self.core.read(DEVICE_NAME_UUID)
    }

    /// Cached appearance code.
    pub fn appearance(&self) -> Option<u16> {
        let value = self.core.value(&APPEARANCE_UUID)?;
        decode_u16("appearance", &value).ok()
    }

    /// Cached device name.
    pub fn device_name(&self) -> Option<String> {
        let value = self.core.value(&DEVICE_NAME_UUID)?;
        decode_string("device name", &value).ok()
    }

    /// Queue a write of a new device name.
    ///
    /// Names longer than [`Self::MAX_NAME_LENGTH`] bytes once encoded are
    /// rejected without touching the transport.
    pub fn set_device_name(&self, name: &str) -> Result<()> {
        let value = encode_string("device name", name, Self::MAX_NAME_LENGTH)?;
        self.core.write(DEVICE_NAME_UUID, value)
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<GenericAccessEvent> {
        self.events.subscribe()
    }

    /// Register a callback for typed events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&GenericAccessEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback)
    }
}

impl PokitService for GenericAccessService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn characteristics(&self) -> &'static [Uuid] {
        &[DEVICE_NAME_UUID, APPEARANCE_UUID]
    }

    fn read_characteristics(&self) -> Result<()> {
        read_all(&self.core, &[APPEARANCE_UUID, DEVICE_NAME_UUID])
    }

    fn characteristic_read(&self, characteristic: &Uuid, value: &[u8]) {
        match *characteristic {
            APPEARANCE_UUID => {
                if let Ok(appearance) = decode_u16("appearance", value) {
                    debug!("Appearance: {}", appearance);
                    self.events.emit(GenericAccessEvent::AppearanceRead(appearance));
                }
            }
            DEVICE_NAME_UUID => {
                if let Ok(name) = decode_string("device name", value) {
                    debug!("Device name: {:?}", name);
                    self.events.emit(GenericAccessEvent::DeviceNameRead(name));
                }
            }
            _ => warn!("Unknown characteristic read for Generic Access: {}", characteristic),
        }
    }

    fn characteristic_written(&self, characteristic: &Uuid, _value: &[u8]) {
        match *characteristic {
            DEVICE_NAME_UUID => self.events.emit(GenericAccessEvent::DeviceNameWritten),
            _ => warn!(
                "Unknown characteristic written for Generic Access: {}",
                characteristic
            ),
        }
    }

    fn characteristic_failed(&self, error: &ServiceError) {
        self.events.emit(GenericAccessEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockTransport;
    use crate::error::Error;
    use crate::service::testing::*;
    use btleplug::api::CharPropFlags;
    use tokio_test::assert_ok;

    fn writable_mock() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_is_ready().return_const(true);
        mock.expect_properties()
            .return_const(Some(CharPropFlags::READ | CharPropFlags::WRITE));
        mock
    }

    #[test]
    fn test_eleven_byte_name_is_written() {
        let mut mock = writable_mock();
        mock.expect_enqueue_write()
            .withf(|_, characteristic, value, _| {
                *characteristic == DEVICE_NAME_UUID && &value[..] == b"Pokit Pro 1"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let service = GenericAccessService::new(Arc::new(mock));
        assert_ok!(service.set_device_name("Pokit Pro 1"));
    }

    #[test]
    fn test_twelve_byte_name_never_reaches_transport() {
        let mut mock = writable_mock();
        mock.expect_enqueue_write().never();

        let service = GenericAccessService::new(Arc::new(mock));
        let result = service.set_device_name("Pokit Pro 12");
        assert!(matches!(
            result,
            Err(Error::ValueTooLong {
                length: 12,
                max: 11,
                ..
            })
        ));
    }

    #[test]
    fn test_name_limit_counts_encoded_bytes() {
        let mut mock = writable_mock();
        mock.expect_enqueue_write().never();

        // Six characters, twelve bytes.
        let service = GenericAccessService::new(Arc::new(mock));
        assert!(service.set_device_name("ΩΩΩΩΩΩ").is_err());
    }

    #[tokio::test]
    async fn test_reads_raise_typed_events() {
        let transport = FakeTransport::new(
            vec![GENERIC_ACCESS_SERVICE_UUID],
            &[
                (GENERIC_ACCESS_SERVICE_UUID, APPEARANCE_UUID),
                (GENERIC_ACCESS_SERVICE_UUID, DEVICE_NAME_UUID),
            ],
        );
        let service = GenericAccessService::new(transport.clone());
        let mut rx = service.subscribe();

        assert_ok!(service.read_characteristics());
        assert_eq!(transport.calls().len(), 2);

        service.handle_event(&read_complete(
            GENERIC_ACCESS_SERVICE_UUID,
            APPEARANCE_UUID,
            &[0x40, 0x0c],
        ));
        service.handle_event(&read_complete(
            GENERIC_ACCESS_SERVICE_UUID,
            DEVICE_NAME_UUID,
            b"PokitMeter",
        ));

        assert_eq!(rx.recv().await.unwrap(), GenericAccessEvent::AppearanceRead(0x0c40));
        assert_eq!(
            rx.recv().await.unwrap(),
            GenericAccessEvent::DeviceNameRead("PokitMeter".to_string())
        );
        assert_eq!(service.appearance(), Some(0x0c40));
        assert_eq!(service.device_name().as_deref(), Some("PokitMeter"));
    }

    #[tokio::test]
    async fn test_short_appearance_is_unavailable() {
        let transport = FakeTransport::new(vec![GENERIC_ACCESS_SERVICE_UUID], &[]);
        let service = GenericAccessService::new(transport);
        let mut rx = service.subscribe();

        service.handle_event(&read_complete(GENERIC_ACCESS_SERVICE_UUID, APPEARANCE_UUID, &[0x40]));
        service.handle_event(&write_complete(
            GENERIC_ACCESS_SERVICE_UUID,
            DEVICE_NAME_UUID,
            b"x",
        ));

        assert_eq!(service.appearance(), None);
        assert_eq!(rx.recv().await.unwrap(), GenericAccessEvent::DeviceNameWritten);
    }
}
