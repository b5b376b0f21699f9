//! Error types for the bdsk-ble crate.

use thiserror::Error;

use crate::ble::session::{OperationKind, SessionState};

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable radio: Bluetooth is missing, disabled, or the handle was released.
    #[error("Bluetooth radio not available or disabled")]
    RadioUnavailable,

    /// A scan is already active on this scan session.
    #[error("Already scanning")]
    AlreadyScanning,

    /// The operation is not valid in the session's current state.
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: OperationKind,
        /// The state the session was in.
        state: SessionState,
    },

    /// Another request is still outstanding on this session.
    #[error("Operation in progress: {pending}")]
    OperationInProgress {
        /// The request that currently holds the slot.
        pending: OperationKind,
    },

    /// The service/characteristic pair is absent from the current catalog.
    #[error("Characteristic {characteristic} of service {service} not found")]
    NotFound {
        /// The service UUID that was looked up.
        service: String,
        /// The characteristic UUID that was looked up.
        characteristic: String,
    },

    /// The transport rejected a request or the remote returned a failure.
    #[error("Transport failure during {operation}: {reason}")]
    TransportFailure {
        /// The operation that failed.
        operation: OperationKind,
        /// Description of the failure.
        reason: String,
    },

    /// A string could not be parsed as a UUID.
    #[error("Invalid UUID: {value}")]
    InvalidUuid {
        /// The rejected input.
        value: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether this error was raised locally without touching the transport.
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::OperationInProgress { .. } | Self::NotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidState {
            operation: OperationKind::DiscoverServices,
            state: SessionState::Disconnected,
        };
        assert_eq!(
            err.to_string(),
            "DiscoverServices is not valid while Disconnected"
        );

        let err = Error::OperationInProgress {
            pending: OperationKind::WriteCharacteristic,
        };
        assert_eq!(err.to_string(), "Operation in progress: WriteCharacteristic");
    }

    #[test]
    fn test_synchronous_classification() {
        assert!(Error::NotFound {
            service: "a".into(),
            characteristic: "b".into(),
        }
        .is_synchronous());
        assert!(!Error::RadioUnavailable.is_synchronous());
        assert!(!Error::TransportFailure {
            operation: OperationKind::ReadRssi,
            reason: "busy".into(),
        }
        .is_synchronous());
    }
}
