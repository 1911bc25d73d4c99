//! BLE communication module.
//!
//! This module provides the transport boundary the session drives and its
//! `btleplug` implementation for talking to cleaners over the UART service.

pub mod adapter;
pub mod connection;
pub mod transport;
pub mod uuids;

pub use adapter::BtleplugTransport;
pub use connection::UartLink;
pub use transport::{AdapterState, Transport, TransportEvent, WriteMode};
pub use uuids::*;
