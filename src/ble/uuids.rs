//! BLE Service and Characteristic UUIDs.
//!
//! The cleaner exposes the common HM-10 style serial service: a single
//! vendor service with one characteristic that carries both directions of
//! the byte stream.

use uuid::Uuid;

/// Cleaner UART service UUID (16-bit `FFE0`).
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);

/// UART transmit characteristic UUID (write without response).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);

/// UART receive characteristic UUID (read, notify).
///
/// Same characteristic as [`UART_TX_UUID`] on this hardware.
pub const UART_RX_UUID: Uuid = UART_TX_UUID;

/// Largest payload the device accepts in one write.
pub const MAX_WRITE_LEN: usize = 20;

/// Expand a 16-bit Bluetooth SIG short UUID into a full 128-bit UUID.
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}
