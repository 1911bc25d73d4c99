//! Protocol module for encoding commands and decoding status messages.
//!
//! This module contains the implementations for:
//! - Outgoing command encoding
//! - Status message decoding
//! - Reassembly of status messages from notification chunks

pub mod command;
pub mod framer;
pub mod status;

pub use command::Command;
pub use framer::{FramingMode, StatusDecoder, StatusFrame};
pub use status::StatusEvent;
