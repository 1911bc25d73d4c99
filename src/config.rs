//! Session and adapter configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::transport::WriteMode;
use crate::ble::uuids::{UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID};
use crate::error::{Error, Result};
use crate::protocol::FramingMode;

/// Behavior of the session state machine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long a scan runs before it gives up.
    pub scan_timeout: Duration,
    /// How long to wait for a selected device to connect.
    pub connect_timeout: Duration,
    /// How long to wait for the link to close after a disconnect request.
    pub disconnect_timeout: Duration,
    /// Reject `disconnect()` while a cycle is running.
    pub block_disconnect_while_running: bool,
    /// Delivery mode for command writes.
    pub write_mode: WriteMode,
    /// How notification chunks are split into status messages.
    pub framing: FramingMode,
    /// Number of events buffered for each channel subscriber.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Default scan timeout (10 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default connect timeout (10 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default disconnect timeout (5 seconds).
    pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default event channel depth.
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the disconnect timeout.
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Allow or block `disconnect()` while a cycle is running.
    pub fn with_block_disconnect_while_running(mut self, block: bool) -> Self {
        self.block_disconnect_while_running = block;
        self
    }

    /// Set the write mode.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Set the framing mode.
    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }

    /// Set the event channel depth.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for zero timeouts or a zero
    /// event capacity.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("scan_timeout", self.scan_timeout),
            ("connect_timeout", self.connect_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
        ];

        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                    value: format!("{:?}", value),
                });
            }
        }

        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter {
                name: "event_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            disconnect_timeout: Self::DEFAULT_DISCONNECT_TIMEOUT,
            block_disconnect_while_running: true,
            write_mode: WriteMode::default(),
            framing: FramingMode::default(),
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// GATT layout and scan filtering for the `btleplug` transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterConfig {
    /// Service that carries the UART characteristics.
    pub service_uuid: Uuid,
    /// Characteristic commands are written to.
    pub tx_uuid: Uuid,
    /// Characteristic status notifications arrive on.
    pub rx_uuid: Uuid,
    /// Only report peripherals that advertise `service_uuid`.
    pub filter_by_service: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            service_uuid: UART_SERVICE_UUID,
            tx_uuid: UART_TX_UUID,
            rx_uuid: UART_RX_UUID,
            filter_by_service: true,
        }
    }
}
