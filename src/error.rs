//! Error types for the cleaning-utility-ble crate.

use thiserror::Error;

use crate::ble::transport::AdapterState;
use crate::data::SessionState;

/// The main error type for this crate.
///
/// Only command rejections and setup failures are reported through this type.
/// Failures that happen on the radio after a command was accepted are
/// delivered as [`SessionCondition`](crate::events::SessionCondition) events.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter could be found on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The adapter is in a state that does not allow scanning or connecting.
    #[error("Bluetooth adapter unavailable: {state}")]
    AdapterUnavailable {
        /// The adapter state at the time of the request.
        state: AdapterState,
    },

    /// The operation is not allowed in the current session state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The session state at the time of the request.
        state: SessionState,
    },

    /// The requested device is not in the discovery registry.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but no device is connected.
    #[error("Device not connected")]
    NotConnected,

    /// A cleaning cycle is running and the request would interrupt it.
    #[error("Cleaning cycle in progress")]
    CycleInProgress,

    /// A start command was already written and is waiting for the device.
    #[error("Command already pending")]
    CommandPending,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// The session task has stopped and no longer accepts commands.
    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    /// Check if this error is a rejection caused by a running cycle.
    pub fn is_cycle_conflict(&self) -> bool {
        matches!(self, Self::CycleInProgress)
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
            operation: "start a cycle",
            state: SessionState::Scanning,
        };
        assert_eq!(err.to_string(), "Cannot start a cycle while Scanning");

        let err = Error::AdapterUnavailable {
            state: AdapterState::PoweredOff,
        };
        assert_eq!(
            err.to_string(),
            "Bluetooth adapter unavailable: powered off"
        );
    }

    #[test]
    fn test_is_cycle_conflict() {
        assert!(Error::CycleInProgress.is_cycle_conflict());
        assert!(!Error::NotConnected.is_cycle_conflict());
    }
}
