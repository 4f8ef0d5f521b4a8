//! Error taxonomy for the bus-interaction subsystem.
//!
//! Construction-time failures are accumulated and surfaced as a single [`SlaveInformantError`];
//! everything observed once the bus is running is published into the error
//! [`crate::search_list::SearchList`] instead of aborting (see spec §7).

use crate::data_object::DataObject;

/// Severity of an [`ErrorMessage`].
///
/// Ordered `Low < Medium < Fatal` so the worst severity seen so far can be tracked with
/// [`Ord::max`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// A single data point could not be read, or one PDO is unavailable; the system continues at
    /// reduced fidelity.
    Low,
    /// A slave is partially unusable: its CoE dictionary is unreadable, a bus-mode transition
    /// failed after retries, or an SDO request failed.
    Medium,
    /// The bus cannot be brought up, or a log file is unreadable. Construction fails and the
    /// accumulated error list is surfaced to the caller.
    Fatal,
}

/// A diagnostic message produced by the realtime loop, the slave informant, or the logger.
///
/// Mirrors the original `datatypes::ErrorMessage`: a message string, a severity, and zero, one or
/// two associated slave ids (the master's id, 0, is a valid association).
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    message: String,
    slaves: (Option<u32>, Option<u32>),
    severity: ErrorSeverity,
}

impl ErrorMessage {
    /// Create an error with no associated slave.
    pub fn new(message: impl Into<String>, severity: ErrorSeverity) -> Self {
        Self {
            message: message.into(),
            slaves: (None, None),
            severity,
        }
    }

    /// Create an error associated with a single slave.
    pub fn for_slave(message: impl Into<String>, slave: u32, severity: ErrorSeverity) -> Self {
        Self {
            message: message.into(),
            slaves: (Some(slave), None),
            severity,
        }
    }

    /// Create an error associated with two slaves (e.g. a topology inconsistency between
    /// neighbours).
    pub fn for_slave_pair(message: impl Into<String>, slaves: (u32, u32), severity: ErrorSeverity) -> Self {
        Self {
            message: message.into(),
            slaves: (Some(slaves.0), Some(slaves.1)),
            severity,
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The slaves associated with this message. Either or both may be `None`.
    pub fn associated_slaves(&self) -> (Option<u32>, Option<u32>) {
        self.slaves
    }

    /// The severity of this error.
    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }
}

impl core::fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)?;

        match self.slaves {
            (Some(a), Some(b)) => write!(f, " (slaves {a}, {b})")?,
            (Some(a), None) => write!(f, " (slave {a})")?,
            _ => {}
        }

        Ok(())
    }
}

/// Errors that can occur while reading or writing a single [`DataObject`].
#[derive(Debug, thiserror::Error)]
pub enum DataObjectError {
    /// No sample has ever been observed for this object.
    #[error("no value has been observed yet for {0:?}")]
    NoValue(DataObject),
    /// The requested byte range does not fit inside the process image.
    #[error("offset {offset} + length {length} exceeds process image of {image_len} bytes")]
    OutOfBounds {
        /// Byte offset into the IO map.
        offset: usize,
        /// Number of bytes requested.
        length: usize,
        /// Size of the IO map.
        image_len: usize,
    },
}

/// Errors produced while enumerating slaves and bringing the bus to an operational state.
#[derive(Debug, thiserror::Error)]
pub enum EnumerationError {
    /// The link layer reported zero slaves on the interface.
    #[error("No slaves were found on this interface")]
    NoSlaves,
    /// The link layer could not be brought up.
    #[error("link layer initialisation failed: {0}")]
    LinkLayerInit(String),
    /// The bus did not reach SafeOp within the configured timeout.
    #[error("bus did not reach SafeOp state")]
    SafeOpTimeout,
    /// EEPROM (ESI) reading failed for a slave in a way that could not be recovered from.
    #[error("failed to read ESI for slave {slave}: {reason}")]
    EepromRead {
        /// The slave's id.
        slave: u32,
        /// Why the read failed.
        reason: String,
    },
}

/// Construction of a [`crate::slave_informant::SlaveInformant`] failed. Carries every error
/// accumulated during enumeration, of which at least one is [`ErrorSeverity::Fatal`].
#[derive(Debug, thiserror::Error)]
#[error("slave informant construction failed with {} errors", .0.len())]
pub struct SlaveInformantError(pub Vec<ErrorMessage>);

/// Errors returned by the binary log codec.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log file's format version is not supported by this reader.
    #[error("unsupported log format version {0}, expected 1")]
    UnsupportedVersion(u64),
    /// The file ended before a complete block could be read.
    #[error("unexpected end of file while reading {0}")]
    UnexpectedEof(&'static str),
    /// A string field was missing its NUL terminator within the file.
    #[error("unterminated string in {0}")]
    UnterminatedString(&'static str),
    /// An I/O error occurred while reading or writing the log file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The top level error type for operations that can fail across several subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// See [`EnumerationError`].
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
    /// Enumeration accumulated one or more errors, at least one of them fatal.
    #[error(transparent)]
    SlaveInformant(#[from] SlaveInformantError),
    /// See [`LogError`].
    #[error(transparent)]
    Log(#[from] LogError),
    /// See [`DataObjectError`].
    #[error(transparent)]
    DataObject(#[from] DataObjectError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_below_fatal() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium < ErrorSeverity::Fatal);
    }

    #[test]
    fn error_message_display_includes_slaves() {
        let msg = ErrorMessage::for_slave("CoE read failed", 3, ErrorSeverity::Medium);

        assert!(msg.to_string().contains("slave 3"));
    }
}
