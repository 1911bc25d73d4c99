//! Transport boundary between the session and the radio.
//!
//! A [`Transport`] accepts fire-and-forget radio requests. It never returns
//! results directly: every outcome comes back later as a [`TransportEvent`]
//! on the channel handed to the session.

use bytes::Bytes;

use crate::data::DeviceId;

/// Power/permission state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet reported by the platform.
    #[default]
    Unknown,
    /// The platform lost its connection to the radio and is restarting it.
    Resetting,
    /// The platform has no Bluetooth LE support.
    Unsupported,
    /// The application is not allowed to use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and ready.
    PoweredOn,
}

impl AdapterState {
    /// Check if the adapter is ready for scanning and connecting.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }

    /// Check if the state is expected to resolve on its own.
    ///
    /// Unknown and resetting adapters usually report `PoweredOn` shortly after.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unknown | Self::Resetting)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Resetting => write!(f, "resetting"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::PoweredOff => write!(f, "powered off"),
            Self::PoweredOn => write!(f, "powered on"),
        }
    }
}

impl From<btleplug::api::CentralState> for AdapterState {
    fn from(state: btleplug::api::CentralState) -> Self {
        use btleplug::api::CentralState;

        match state {
            CentralState::PoweredOn => Self::PoweredOn,
            CentralState::PoweredOff => Self::PoweredOff,
            _ => Self::Unknown,
        }
    }
}

/// Delivery confirmation mode for characteristic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteMode {
    /// Wait for the peripheral to acknowledge the write.
    WithResponse,
    /// Fire the write without an acknowledgement.
    #[default]
    WithoutResponse,
}

impl From<WriteMode> for btleplug::api::WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => Self::WithResponse,
            WriteMode::WithoutResponse => Self::WithoutResponse,
        }
    }
}

/// Events emitted by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peripheral advertised during a scan.
    PeripheralDiscovered {
        /// Stable platform identifier of the peripheral.
        identifier: DeviceId,
        /// Advertised local name.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// The link to a peripheral is up and the UART characteristic is ready.
    Connected(DeviceId),
    /// The link to a peripheral went down.
    Disconnected {
        /// The peripheral that disconnected.
        identifier: DeviceId,
        /// Platform-provided reason, if any.
        reason: Option<String>,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// The peripheral that could not be connected.
        identifier: DeviceId,
        /// Description of the failure.
        reason: String,
    },
    /// Bytes arrived on the receive characteristic.
    DataReceived(Bytes),
    /// A write could not be delivered.
    WriteFailed {
        /// Description of the failure.
        reason: String,
    },
    /// The adapter changed power or permission state.
    AdapterStateChanged(AdapterState),
}

/// Radio operations used by the session.
///
/// Implementations must not block: each call queues the operation and
/// returns immediately. When the adapter is not powered on, `start_scan` and
/// `connect` do nothing except emit [`TransportEvent::AdapterStateChanged`]
/// with the current state.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Start scanning for peripherals.
    fn start_scan(&self);

    /// Stop an active scan.
    fn stop_scan(&self);

    /// Connect to a previously discovered peripheral.
    fn connect(&self, identifier: &DeviceId);

    /// Tear down the current link or pending connection attempt.
    fn disconnect(&self);

    /// Write raw bytes to the transmit characteristic.
    fn write(&self, data: &[u8], mode: WriteMode);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state() {
        assert!(AdapterState::PoweredOn.is_powered_on());
        assert!(!AdapterState::PoweredOff.is_powered_on());

        assert!(AdapterState::Unknown.is_transient());
        assert!(AdapterState::Resetting.is_transient());
        assert!(!AdapterState::Unauthorized.is_transient());
        assert!(!AdapterState::PoweredOn.is_transient());
    }

    #[test]
    fn test_adapter_state_display() {
        assert_eq!(format!("{}", AdapterState::PoweredOff), "powered off");
        assert_eq!(format!("{}", AdapterState::Unauthorized), "unauthorized");
    }

    #[test]
    fn test_central_state_conversion() {
        use btleplug::api::CentralState;

        assert_eq!(
            AdapterState::from(CentralState::PoweredOn),
            AdapterState::PoweredOn
        );
        assert_eq!(
            AdapterState::from(CentralState::PoweredOff),
            AdapterState::PoweredOff
        );
        assert_eq!(
            AdapterState::from(CentralState::Unknown),
            AdapterState::Unknown
        );
    }

    #[test]
    fn test_write_mode_conversion() {
        use btleplug::api::WriteType;

        assert_eq!(WriteType::from(WriteMode::default()), WriteType::WithoutResponse);
        assert_eq!(WriteType::from(WriteMode::WithResponse), WriteType::WithResponse);
    }
}
