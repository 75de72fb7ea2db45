//! Error types for the pokit-ble crate.

use thiserror::Error;

use crate::codec::DecodeError;

/// The main error type for this crate.
///
/// None of these are fatal: every operation that can fail reports it through
/// a `Result`, and the caller decides whether to retry, abort or carry on.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available.
    #[error("Bluetooth is not available")]
    BluetoothUnavailable,

    /// The connection is not ready (not connected, or service discovery is incomplete).
    #[error("Device not ready (not connected, or services not yet discovered)")]
    NotReady,

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The characteristic does not support writes.
    #[error("Characteristic is not writable: {uuid}")]
    NotWritable {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// The characteristic does not support reads.
    #[error("Characteristic is not readable: {uuid}")]
    NotReadable {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// The characteristic supports neither notifications nor indications.
    #[error("Characteristic does not support notifications: {uuid}")]
    NotNotifiable {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// An encoded value exceeds the characteristic's maximum payload size.
    #[error("{name} is too long ({length} > {max} bytes)")]
    ValueTooLong {
        /// What was being encoded.
        name: String,
        /// Encoded length in bytes.
        length: usize,
        /// Maximum permitted length in bytes.
        max: usize,
    },

    /// A payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The connected device is not a supported Pokit product.
    #[error("Device is not a supported Pokit product")]
    UnknownProduct,
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_too_long_message() {
        let error = Error::ValueTooLong {
            name: "Device name".to_string(),
            length: 12,
            max: 11,
        };
        assert_eq!(error.to_string(), "Device name is too long (12 > 11 bytes)");
    }

    #[test]
    fn test_decode_error_is_transparent() {
        let error: Error = DecodeError::InvalidUtf8 { label: "Name" }.into();
        assert_eq!(error.to_string(), "Invalid UTF-8 in Name");
    }
}
