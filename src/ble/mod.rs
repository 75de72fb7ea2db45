//! BLE communication module.
//!
//! This module provides the transport the protocol services run on: the
//! [`Transport`] contract and its btleplug implementation, plus discovery of
//! nearby Pokit devices and the UUIDs of every service and characteristic.

pub mod peripheral;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use peripheral::{ConnectionState, PeripheralTransport};
pub use scanner::{PokitDiscoveryEvent, PokitScanner};
pub use transport::{Transport, TransportEvent};
pub use uuids::*;
