//! Integer encoding of bytes for hosts without a byte-buffer type.
//!
//! Lua sees payloads as sequences of integers in `[0, 255]`; everything on
//! the Rust side stays `u8`.

use super::error::SessionError;

/// Converts host integers to bytes, rejecting the whole payload if any
/// element is out of range.
pub fn bytes_from_ints(values: &[i64]) -> Result<Vec<u8>, SessionError> {
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            u8::try_from(value).map_err(|_| SessionError::InvalidByte { index, value })
        })
        .collect()
}

/// Converts bytes to their unsigned integer values.
pub fn ints_from_bytes(bytes: &[u8]) -> Vec<i64> {
    bytes.iter().map(|&b| i64::from(b)).collect()
}
