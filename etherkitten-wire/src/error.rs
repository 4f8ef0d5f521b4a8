//! Errors produced while packing or unpacking wire types.

use core::fmt;

/// An error produced while packing or unpacking a value to/from its EtherCAT wire
/// representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The source buffer was too short to hold the expected number of bytes.
    ReadBufferTooShort {
        /// Number of bytes the type needs.
        expected: usize,
        /// Number of bytes actually available.
        got: usize,
    },
    /// The destination buffer was too short to receive the packed representation.
    WriteBufferTooShort {
        /// Number of bytes the type needs.
        expected: usize,
        /// Number of bytes actually available.
        got: usize,
    },
    /// A decoded value did not correspond to any known variant of the target type.
    InvalidValue,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadBufferTooShort { expected, got } => {
                write!(f, "read buffer too short: expected {expected} bytes, got {got}")
            }
            Self::WriteBufferTooShort { expected, got } => {
                write!(f, "write buffer too short: expected {expected} bytes, got {got}")
            }
            Self::InvalidValue => write!(f, "decoded value is not a valid member of its type"),
        }
    }
}

impl core::error::Error for WireError {}
