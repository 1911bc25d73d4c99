//! Outgoing commands.
//!
//! Commands are written to the UART characteristic as bare bytes: no sync
//! bytes, no length prefix, no terminator.

use bytes::Bytes;

use crate::ble::uuids::MAX_WRITE_LEN;
use crate::error::{Error, Result};

/// Payload that starts a cleaning cycle.
pub const START_CYCLE_PAYLOAD: &[u8] = b"1";

/// A command payload ready to be written to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    payload: Bytes,
}

impl Command {
    /// Create a command from a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the payload is empty or longer
    /// than [`MAX_WRITE_LEN`] bytes.
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        if payload.is_empty() || payload.len() > MAX_WRITE_LEN {
            return Err(Error::InvalidParameter {
                name: "payload length".to_string(),
                value: payload.len().to_string(),
            });
        }

        Ok(Self { payload })
    }

    /// The "start cycle" command.
    pub fn start_cycle() -> Self {
        Self {
            payload: Bytes::from_static(START_CYCLE_PAYLOAD),
        }
    }

    /// Get the encoded payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Always false; empty commands cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.payload))
    }
}
