//! Little-endian binary codec shared by every Pokit service.
//!
//! Scalars are fixed width and always little-endian. Strings are raw UTF-8
//! with no length prefix or terminator: the characteristic payload length is
//! the string length.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Errors raised while decoding characteristic payloads.
///
/// These mean "value unavailable" rather than anything fatal; devices may
/// send short or legacy payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload length is outside the accepted range.
    #[error("{label}: expected {expected_min}..={expected_max} bytes, got {actual}")]
    SizeMismatch {
        /// What was being decoded.
        label: &'static str,
        /// Minimum accepted length.
        expected_min: usize,
        /// Maximum accepted length.
        expected_max: usize,
        /// Length received.
        actual: usize,
    },

    /// A field holds a value this crate does not understand.
    #[error("{label}: unknown value {value:#04x}")]
    InvalidValue {
        /// What was being decoded.
        label: &'static str,
        /// Raw value received.
        value: u8,
    },

    /// String payload is not valid UTF-8.
    #[error("Invalid UTF-8 in {label}")]
    InvalidUtf8 {
        /// What was being decoded.
        label: &'static str,
    },
}

/// Check that `data` holds at least `min` bytes.
///
/// Payloads longer than `max` are accepted; the extra trailing bytes are
/// logged and left for the caller to ignore, since newer firmware may append
/// fields.
pub fn check_size(
    label: &'static str,
    data: &[u8],
    min: usize,
    max: usize,
) -> std::result::Result<(), DecodeError> {
    if data.len() < min {
        warn!(
            "Invalid {} size {} (need at least {}): {:02X?}",
            label,
            data.len(),
            min,
            data
        );
        return Err(DecodeError::SizeMismatch {
            label,
            expected_min: min,
            expected_max: max,
            actual: data.len(),
        });
    }
    if data.len() > max {
        debug!(
            "{} has {} more byte(s) than expected; ignoring the extra",
            label,
            data.len() - max
        );
    }
    Ok(())
}

/// Check that `data` is exactly `width` bytes.
pub fn check_exact_size(
    label: &'static str,
    data: &[u8],
    width: usize,
) -> std::result::Result<(), DecodeError> {
    if data.len() != width {
        warn!(
            "Invalid {} size {} (expected {}): {:02X?}",
            label,
            data.len(),
            width,
            data
        );
        return Err(DecodeError::SizeMismatch {
            label,
            expected_min: width,
            expected_max: width,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Encode a single byte.
pub fn encode_u8(value: u8) -> Bytes {
    Bytes::copy_from_slice(&[value])
}

/// Decode a single byte.
pub fn decode_u8(label: &'static str, data: &[u8]) -> std::result::Result<u8, DecodeError> {
    check_exact_size(label, data, 1)?;
    Ok(data[0])
}

/// Encode a 16-bit unsigned integer.
pub fn encode_u16(value: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16_le(value);
    buf.freeze()
}

/// Decode a 16-bit unsigned integer.
pub fn decode_u16(label: &'static str, mut data: &[u8]) -> std::result::Result<u16, DecodeError> {
    check_exact_size(label, data, 2)?;
    Ok(data.get_u16_le())
}

/// Encode a 32-bit unsigned integer.
pub fn encode_u32(value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32_le(value);
    buf.freeze()
}

/// Decode a 32-bit unsigned integer.
pub fn decode_u32(label: &'static str, mut data: &[u8]) -> std::result::Result<u32, DecodeError> {
    check_exact_size(label, data, 4)?;
    Ok(data.get_u32_le())
}

/// Encode a 32-bit IEEE-754 float.
pub fn encode_f32(value: f32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_f32_le(value);
    buf.freeze()
}

/// Decode a 32-bit IEEE-754 float.
pub fn decode_f32(label: &'static str, mut data: &[u8]) -> std::result::Result<f32, DecodeError> {
    check_exact_size(label, data, 4)?;
    Ok(data.get_f32_le())
}

/// Decode a raw UTF-8 string.
pub fn decode_string(label: &'static str, data: &[u8]) -> std::result::Result<String, DecodeError> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { label })
}

/// Encode a string as raw UTF-8, rejecting anything longer than `max_len` bytes.
pub fn encode_string(label: &str, value: &str, max_len: usize) -> Result<Bytes> {
    let encoded = value.as_bytes();
    if encoded.len() > max_len {
        warn!(
            "{} \"{}\" is too long ({} > {} bytes): {:02X?}",
            label,
            value,
            encoded.len(),
            max_len,
            encoded
        );
        return Err(Error::ValueTooLong {
            name: label.to_string(),
            length: encoded.len(),
            max: max_len,
        });
    }
    Ok(Bytes::copy_from_slice(encoded))
}

/// Decode a packed sequence of little-endian signed 16-bit samples.
pub fn decode_samples(label: &'static str, data: &[u8]) -> std::result::Result<Vec<i16>, DecodeError> {
    if data.len() % 2 != 0 {
        warn!("{} has an odd number of bytes: {}", label, data.len());
        return Err(DecodeError::SizeMismatch {
            label,
            expected_min: data.len() - 1,
            expected_max: data.len() + 1,
            actual: data.len(),
        });
    }
    let mut buf = data;
    let mut samples = Vec::with_capacity(data.len() / 2);
    while buf.has_remaining() {
        samples.push(buf.get_i16_le());
    }
    Ok(samples)
}
