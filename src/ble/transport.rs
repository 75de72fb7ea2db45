//! The transport contract consumed by the service layer.
//!
//! A transport owns the radio session. Services only ever ask it to enqueue
//! work; every outcome comes back later as a [`TransportEvent`] on the
//! connection's single event channel, never from within the enqueue call.

use btleplug::api::{CharPropFlags, WriteType};
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

/// Connection session used by every Pokit service on one device.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Connected, and service discovery has completed.
    fn is_ready(&self) -> bool;

    /// UUIDs of the services discovered on the device.
    fn service_uuids(&self) -> Vec<Uuid>;

    /// Properties of a discovered characteristic, or `None` if the device
    /// does not expose it.
    fn properties(&self, service: Uuid, characteristic: Uuid) -> Option<CharPropFlags>;

    /// Queue a characteristic read.
    fn enqueue_read(&self, service: Uuid, characteristic: Uuid) -> Result<()>;

    /// Queue a characteristic write.
    fn enqueue_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: Bytes,
        write_type: WriteType,
    ) -> Result<()>;

    /// Queue a subscription to notifications (or indications).
    fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()>;

    /// Queue an unsubscription.
    fn disable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()>;
}

/// Outcome of a queued operation, or an unsolicited notification.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A read completed.
    ReadComplete {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Value read.
        value: Bytes,
    },
    /// A write completed; `value` is what was written.
    WriteComplete {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Value written.
        value: Bytes,
    },
    /// The device pushed a new value.
    Notification {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Value pushed.
        value: Bytes,
    },
    /// A read failed on the device or in the BLE stack.
    ReadFailed {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Description of the failure.
        reason: String,
    },
    /// A write failed on the device or in the BLE stack.
    WriteFailed {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Description of the failure.
        reason: String,
    },
    /// Enabling or disabling notifications failed.
    SubscribeFailed {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Description of the failure.
        reason: String,
    },
}

impl TransportEvent {
    /// Service the event belongs to.
    pub fn service(&self) -> Uuid {
        match self {
            Self::ReadComplete { service, .. }
            | Self::WriteComplete { service, .. }
            | Self::Notification { service, .. }
            | Self::ReadFailed { service, .. }
            | Self::WriteFailed { service, .. }
            | Self::SubscribeFailed { service, .. } => *service,
        }
    }

    /// Characteristic the event belongs to.
    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::ReadComplete { characteristic, .. }
            | Self::WriteComplete { characteristic, .. }
            | Self::Notification { characteristic, .. }
            | Self::ReadFailed { characteristic, .. }
            | Self::WriteFailed { characteristic, .. }
            | Self::SubscribeFailed { characteristic, .. } => *characteristic,
        }
    }
}
