//! `btleplug` implementation of [`Transport`].
//!
//! Operations are queued to a single worker task and executed strictly in
//! order, one at a time. Outcomes and notifications are reported on one
//! unbounded event channel, which the device facade drains.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{Transport, TransportEvent};
use crate::error::{Error, Result};

/// Connection state for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the device.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected, discovering services.
    Discovering,
    /// Connected with services discovered.
    Ready,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected and ready for service operations.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Discovering | Self::Disconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// A queued GATT operation.
#[derive(Debug)]
enum Operation {
    Read(Characteristic),
    Write(Characteristic, Bytes, WriteType),
    Subscribe(Characteristic),
    Unsubscribe(Characteristic),
}

/// Characteristic descriptors keyed by (service, characteristic).
type CharacteristicMap = HashMap<(Uuid, Uuid), Characteristic>;

/// [`Transport`] over a `btleplug` peripheral.
pub struct PeripheralTransport {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,
    /// Discovered characteristics.
    characteristics: Arc<RwLock<CharacteristicMap>>,
    /// Discovered service UUIDs.
    services: RwLock<Vec<Uuid>>,
    /// Operation queue feeding the worker task.
    queue_tx: RwLock<Option<mpsc::UnboundedSender<Operation>>>,
    /// Event channel drained by the device facade; dropped on disconnect.
    event_tx: RwLock<Option<mpsc::UnboundedSender<TransportEvent>>>,
    /// Worker and notification listener tasks.
    tasks: RwLock<Vec<JoinHandle<()>>>,
    /// Maximum connection attempts.
    max_connect_attempts: u32,
    /// Delay between connection attempts.
    connect_delay: Duration,
}

impl PeripheralTransport {
    /// Create a transport for a peripheral, returning the receiving end of
    /// its event channel.
    pub fn new(peripheral: Peripheral) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let transport = Self {
            peripheral,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            characteristics: Arc::new(RwLock::new(HashMap::new())),
            services: RwLock::new(Vec::new()),
            queue_tx: RwLock::new(None),
            event_tx: RwLock::new(Some(event_tx)),
            tasks: RwLock::new(Vec::new()),
            max_connect_attempts: 3,
            connect_delay: Duration::from_secs(1),
        };
        (transport, event_rx)
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Set the connection retry parameters.
    pub fn set_connect_params(&mut self, max_attempts: u32, delay: Duration) {
        self.max_connect_attempts = max_attempts.max(1);
        self.connect_delay = delay;
    }

    /// Connect, discover services, and start the operation queue.
    ///
    /// A transport cannot reconnect once [`disconnect`](Self::disconnect)
    /// has closed its event channel.
    pub async fn connect(&self) -> Result<()> {
        let current_state = self.state();

        if current_state.is_ready() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        let Some(event_tx) = self.event_tx.read().clone() else {
            return Err(Error::ConnectionFailed {
                reason: "Event channel closed by an earlier disconnect".to_string(),
            });
        };

        self.set_state(ConnectionState::Connecting);

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(
                "Connection attempt {} of {}",
                attempts, self.max_connect_attempts
            );

            match self.peripheral.connect().await {
                Ok(()) => break,
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempts, e);
                    if attempts >= self.max_connect_attempts {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(Error::ConnectionFailed {
                            reason: format!("Failed after {} attempts", attempts),
                        });
                    }
                    tokio::time::sleep(self.connect_delay).await;
                }
            }
        }

        info!("Connected; discovering services");
        self.set_state(ConnectionState::Discovering);

        if let Err(e) = self.peripheral.discover_services().await {
            error!("Service discovery failed: {}", e);
            let _ = self.peripheral.disconnect().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(Error::Bluetooth(e));
        }
        self.cache_services();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_queue(
            self.peripheral.clone(),
            queue_rx,
            event_tx.clone(),
        ));
        let listener = tokio::spawn(forward_notifications(
            self.peripheral.clone(),
            self.characteristics.clone(),
            event_tx,
        ));
        *self.queue_tx.write() = Some(queue_tx);
        self.tasks.write().extend([worker, listener]);

        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Disconnect, stop the operation queue, and close the event channel.
    ///
    /// Operations still queued are dropped without completion events. Once
    /// the worker tasks wind down the receiver returned by [`new`](Self::new)
    /// yields `None`, which ends [`PokitDevice::run`](crate::PokitDevice::run).
    pub async fn disconnect(&self) -> Result<()> {
        let current_state = self.state();
        if matches!(
            current_state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        *self.queue_tx.write() = None;
        *self.event_tx.write() = None;
        for task in self.tasks.write().drain(..) {
            task.abort();
        }
        self.characteristics.write().clear();
        self.services.write().clear();

        let result = self.peripheral.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        match result {
            Ok(()) => {
                info!("Disconnected");
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    /// Cache discovered services and characteristic descriptors.
    fn cache_services(&self) {
        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        let mut uuids = self.services.write();
        chars.clear();
        uuids.clear();

        for service in services {
            uuids.push(service.uuid);
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}, properties: {:?}",
                    characteristic.uuid, service.uuid, characteristic.properties
                );
                chars.insert((service.uuid, characteristic.uuid), characteristic);
            }
        }

        debug!(
            "Discovered {} services, {} characteristics",
            uuids.len(),
            chars.len()
        );
    }

    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(&(service, characteristic))
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })
    }

    fn enqueue(&self, operation: Operation) -> Result<()> {
        let guard = self.queue_tx.read();
        let queue = guard.as_ref().ok_or(Error::NotConnected)?;
        trace!("Queueing {:?}", operation);
        queue.send(operation).map_err(|_| Error::NotConnected)
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
        }
    }
}

impl Transport for PeripheralTransport {
    fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    fn service_uuids(&self) -> Vec<Uuid> {
        self.services.read().clone()
    }

    fn properties(&self, service: Uuid, characteristic: Uuid) -> Option<CharPropFlags> {
        self.characteristics
            .read()
            .get(&(service, characteristic))
            .map(|c| c.properties)
    }

    fn enqueue_read(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let c = self.characteristic(service, characteristic)?;
        self.enqueue(Operation::Read(c))
    }

    fn enqueue_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: Bytes,
        write_type: WriteType,
    ) -> Result<()> {
        let c = self.characteristic(service, characteristic)?;
        self.enqueue(Operation::Write(c, value, write_type))
    }

    fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let c = self.characteristic(service, characteristic)?;
        self.enqueue(Operation::Subscribe(c))
    }

    fn disable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let c = self.characteristic(service, characteristic)?;
        self.enqueue(Operation::Unsubscribe(c))
    }
}

impl Drop for PeripheralTransport {
    fn drop(&mut self) {
        for task in self.tasks.write().drain(..) {
            task.abort();
        }
    }
}

/// Execute queued operations one at a time, reporting each outcome.
async fn run_queue(
    peripheral: Peripheral,
    mut queue: mpsc::UnboundedReceiver<Operation>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    debug!("Operation queue started");

    while let Some(operation) = queue.recv().await {
        let event = match operation {
            Operation::Read(c) => match peripheral.read(&c).await {
                Ok(value) => {
                    trace!("Read {} bytes from {}: {:02X?}", value.len(), c.uuid, value);
                    Some(TransportEvent::ReadComplete {
                        service: c.service_uuid,
                        characteristic: c.uuid,
                        value: Bytes::from(value),
                    })
                }
                Err(e) => Some(TransportEvent::ReadFailed {
                    service: c.service_uuid,
                    characteristic: c.uuid,
                    reason: e.to_string(),
                }),
            },
            Operation::Write(c, value, write_type) => {
                match peripheral.write(&c, &value, write_type).await {
                    Ok(()) => {
                        trace!("Wrote {} bytes to {}", value.len(), c.uuid);
                        Some(TransportEvent::WriteComplete {
                            service: c.service_uuid,
                            characteristic: c.uuid,
                            value,
                        })
                    }
                    Err(e) => Some(TransportEvent::WriteFailed {
                        service: c.service_uuid,
                        characteristic: c.uuid,
                        reason: e.to_string(),
                    }),
                }
            }
            Operation::Subscribe(c) => match peripheral.subscribe(&c).await {
                Ok(()) => {
                    debug!("Subscribed to notifications from {}", c.uuid);
                    None
                }
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", c.uuid, e);
                    Some(TransportEvent::SubscribeFailed {
                        service: c.service_uuid,
                        characteristic: c.uuid,
                        reason: e.to_string(),
                    })
                }
            },
            Operation::Unsubscribe(c) => match peripheral.unsubscribe(&c).await {
                Ok(()) => {
                    debug!("Unsubscribed from notifications from {}", c.uuid);
                    None
                }
                Err(e) => {
                    error!("Failed to unsubscribe from {}: {}", c.uuid, e);
                    Some(TransportEvent::SubscribeFailed {
                        service: c.service_uuid,
                        characteristic: c.uuid,
                        reason: e.to_string(),
                    })
                }
            },
        };

        if let Some(event) = event {
            if events.send(event).is_err() {
                debug!("Event receiver dropped; stopping operation queue");
                break;
            }
        }
    }

    debug!("Operation queue stopped");
}

/// Forward peripheral notifications as transport events.
async fn forward_notifications(
    peripheral: Peripheral,
    characteristics: Arc<RwLock<CharacteristicMap>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut notifications = match peripheral.notifications().await {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to get notifications stream: {}", e);
            return;
        }
    };

    while let Some(notification) = notifications.next().await {
        trace!(
            "Notification received from {}: {} bytes",
            notification.uuid,
            notification.value.len()
        );

        // Notifications carry only the characteristic UUID.
        let service = characteristics
            .read()
            .keys()
            .find(|(_, characteristic)| *characteristic == notification.uuid)
            .map(|(service, _)| *service)
            .unwrap_or_else(Uuid::nil);

        let event = TransportEvent::Notification {
            service,
            characteristic: notification.uuid,
            value: Bytes::from(notification.value),
        };
        if events.send(event).is_err() {
            break;
        }
    }

    debug!("Notification listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_ready());
        assert!(!ConnectionState::Discovering.is_ready());
        assert!(ConnectionState::Ready.is_ready());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Discovering.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Ready.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Ready), "Ready");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }
}
