//! Data structures shared across the session layer.
//!
//! Plain value types handed to observers: discovered devices, session
//! state and cycle progress.

pub mod device;
pub mod progress;
pub mod state;

pub use device::{DeviceId, DiscoveredDevice};
pub use progress::CycleProgress;
pub use state::SessionState;
