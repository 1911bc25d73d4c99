//! Discovered device data structures.

use chrono::{DateTime, Utc};

/// Stable platform identifier of a peripheral.
///
/// On Apple platforms this is the per-host peripheral UUID, on Linux and
/// Windows the hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(identifier: &str) -> Self {
        Self::new(identifier)
    }
}

impl From<String> for DeviceId {
    fn from(identifier: String) -> Self {
        Self(identifier)
    }
}

/// A peripheral seen during the current scan.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredDevice {
    /// Stable platform identifier.
    pub identifier: DeviceId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm at first sighting.
    ///
    /// Peripherals that did not report a value are recorded as 0.
    pub rssi: i16,
    /// When the peripheral was first seen in this scan.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    /// Name shown for peripherals that do not advertise one.
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    /// Create a new discovered device stamped with the current time.
    pub fn new(identifier: DeviceId, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            identifier,
            name,
            rssi: rssi.unwrap_or(0),
            discovered_at: Utc::now(),
        }
    }

    /// Get the name to show for this device.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(Self::UNKNOWN_NAME)
    }
}

impl std::fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, RSSI: {} dBm)",
            self.display_name(),
            self.identifier,
            self.rssi
        )
    }
}
