// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # cleaning-utility-ble
//!
//! A Rust library for driving a Bluetooth Low Energy cleaning device: find
//! nearby cleaners, connect to one, start a cleaning cycle and follow its
//! progress until it reports completion.
//!
//! ## Features
//!
//! - **Discovery**: Scan for cleaners, ordered by signal strength
//! - **Session State Machine**: Idle, scanning, connecting, connected,
//!   running and disconnecting, with scan, connect and disconnect timeouts
//! - **Cycle Control**: Start a cycle and follow its progress reports
//! - **Events**: Callback and channel subscribers for state, devices,
//!   progress and failure conditions
//! - **Pluggable Transport**: Drive the session from any [`Transport`],
//!   including a fake one in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cleaning_utility_ble::{AdapterConfig, Result, Session, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::with_bluetooth(SessionConfig::default(), AdapterConfig::default()).await?;
//!
//!     let _handle = session.subscribe(|event| {
//!         if let SessionEvent::ProgressChanged(progress) = event {
//!             println!("Cleaning: {}%", progress.percent());
//!         }
//!     });
//!
//!     session.request_scan().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     // Connect to the strongest cleaner found
//!     if let Some(device) = session.devices().last() {
//!         session.select_device(device.identifier.clone()).await?;
//!     }
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod session;

// Re-exports for convenience
pub use ble::{AdapterState, BtleplugTransport, Transport, TransportEvent, WriteMode};
pub use config::{AdapterConfig, SessionConfig};
pub use data::{CycleProgress, DeviceId, DiscoveredDevice, SessionState};
pub use error::{Error, Result};
pub use events::{CallbackHandle, EventBus, SessionCondition, SessionEvent};
pub use protocol::{Command, FramingMode, StatusDecoder, StatusEvent};
pub use registry::DeviceRegistry;
pub use session::{Session, SessionSnapshot};
