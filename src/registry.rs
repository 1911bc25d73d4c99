//! Device discovery registry.
//!
//! Collects the peripherals seen during one scan. Each identifier appears
//! once, and the list is kept sorted by ascending RSSI (weakest first).

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::data::{DeviceId, DiscoveredDevice};

/// Deduplicating, RSSI-ordered list of discovered devices.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// Devices sorted by ascending RSSI; ties keep discovery order.
    devices: Vec<DiscoveredDevice>,
    /// Identifiers already recorded.
    seen: HashSet<DeviceId>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovery.
    ///
    /// The first sighting of an identifier wins: later sightings of the same
    /// identifier are ignored, including their RSSI. Returns `true` if the
    /// device was added.
    pub fn on_discovered(
        &mut self,
        identifier: DeviceId,
        name: Option<String>,
        rssi: Option<i16>,
    ) -> bool {
        if self.seen.contains(&identifier) {
            trace!("Ignoring duplicate discovery of {}", identifier);
            return false;
        }

        let device = DiscoveredDevice::new(identifier, name, rssi);
        debug!("Peripheral discovered: {}", device);

        // Insert after any existing entries with the same RSSI.
        let index = self.devices.partition_point(|d| d.rssi <= device.rssi);
        self.seen.insert(device.identifier.clone());
        self.devices.insert(index, device);

        true
    }

    /// Get the ordered list of discovered devices.
    pub fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.devices.clone()
    }

    /// Look up a device by identifier.
    pub fn get(&self, identifier: &DeviceId) -> Option<&DiscoveredDevice> {
        if !self.seen.contains(identifier) {
            return None;
        }
        self.devices.iter().find(|d| &d.identifier == identifier)
    }

    /// Get the device with the strongest signal.
    pub fn strongest(&self) -> Option<&DiscoveredDevice> {
        self.devices.last()
    }

    /// Remove all devices.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.seen.clear();
    }

    /// Get the number of discovered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no devices have been discovered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ids(registry: &DeviceRegistry) -> Vec<String> {
        registry
            .snapshot()
            .iter()
            .map(|d| d.identifier.to_string())
            .collect()
    }

    #[test]
    fn test_sorted_weakest_first() {
        let mut registry = DeviceRegistry::new();
        registry.on_discovered("A".into(), Some("A".to_string()), Some(-80));
        registry.on_discovered("B".into(), Some("B".to_string()), Some(-40));
        registry.on_discovered("C".into(), None, Some(-60));

        assert_eq!(ids(&registry), vec!["A", "C", "B"]);
        assert_eq!(registry.strongest().map(|d| d.identifier.as_str()), Some("B"));
    }

    #[test]
    fn test_duplicate_keeps_first_sighting() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.on_discovered("A".into(), Some("First".to_string()), Some(-80)));
        assert!(!registry.on_discovered("A".into(), Some("Second".to_string()), Some(-30)));

        assert_eq!(registry.len(), 1);
        let device = registry.get(&"A".into()).unwrap();
        assert_eq!(device.rssi, -80);
        assert_eq!(device.name.as_deref(), Some("First"));
    }

    #[test]
    fn test_equal_rssi_keeps_discovery_order() {
        let mut registry = DeviceRegistry::new();
        registry.on_discovered("A".into(), None, Some(-50));
        registry.on_discovered("B".into(), None, Some(-50));
        registry.on_discovered("C".into(), None, Some(-50));

        assert_eq!(ids(&registry), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_missing_rssi_sorts_as_zero() {
        let mut registry = DeviceRegistry::new();
        registry.on_discovered("A".into(), None, None);
        registry.on_discovered("B".into(), None, Some(-20));

        assert_eq!(ids(&registry), vec!["B", "A"]);
    }

    #[test]
    fn test_clear() {
        let mut registry = DeviceRegistry::new();
        registry.on_discovered("A".into(), None, Some(-50));
        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.get(&"A".into()).is_none());

        // Cleared identifiers can be discovered again.
        assert!(registry.on_discovered("A".into(), None, Some(-70)));
        assert_eq!(registry.get(&"A".into()).unwrap().rssi, -70);
    }

    proptest! {
        #[test]
        fn prop_unique_and_sorted(
            sightings in prop::collection::vec((0u8..16, prop::option::of(-100i16..0)), 0..64)
        ) {
            let mut registry = DeviceRegistry::new();
            for (id, rssi) in &sightings {
                registry.on_discovered(DeviceId::new(format!("dev-{}", id)), None, *rssi);
            }

            let snapshot = registry.snapshot();
            let unique: HashSet<_> = snapshot.iter().map(|d| d.identifier.clone()).collect();
            prop_assert_eq!(unique.len(), snapshot.len());
            prop_assert!(snapshot.windows(2).all(|w| w[0].rssi <= w[1].rssi));

            let distinct: HashSet<_> = sightings.iter().map(|(id, _)| *id).collect();
            prop_assert_eq!(snapshot.len(), distinct.len());
        }

        #[test]
        fn prop_first_rssi_wins(first in -100i16..0, second in -100i16..0) {
            let mut registry = DeviceRegistry::new();
            registry.on_discovered("A".into(), None, Some(first));
            registry.on_discovered("A".into(), None, Some(second));
            prop_assert_eq!(registry.get(&"A".into()).unwrap().rssi, first);
        }
    }
}
