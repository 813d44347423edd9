//! Device registry
//!
//! Tracks one [`DeviceSession`] per attached SUIDI interface and reconciles
//! that set against the bus on demand. Runs on the output worker thread;
//! `&mut self` keeps reconciliations from overlapping.

use crate::usb::session::{DeviceSession, SessionConfig};
use common::{DeviceKey, UsbBus, UsbDevice, UsbError};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Registry of tracked SUIDI devices
pub struct DeviceRegistry<B: UsbBus> {
    /// Bus to enumerate
    bus: B,
    /// Tracked sessions, in discovery order
    sessions: Vec<DeviceSession<B::Device>>,
    /// Parameters handed to new sessions
    config: SessionConfig,
}

impl<B: UsbBus> DeviceRegistry<B> {
    /// Create an empty registry; call [`rescan`](Self::rescan) to populate it
    pub fn new(bus: B, config: SessionConfig) -> Self {
        Self {
            bus,
            sessions: Vec::new(),
            config,
        }
    }

    /// Enumerate the bus and reconcile against it
    ///
    /// Returns whether the set of tracked devices changed.
    pub fn rescan(&mut self) -> Result<bool, UsbError> {
        let devices = self.bus.devices()?;
        Ok(self.reconcile(devices))
    }

    /// Reconcile tracked sessions against the devices currently attached
    ///
    /// Supported devices not yet tracked get a new session. Sessions whose
    /// device is missing from `devices` are dropped, which closes them.
    /// Returns whether the number of tracked devices changed.
    pub fn reconcile(&mut self, devices: Vec<B::Device>) -> bool {
        let before = self.sessions.len();
        let mut missing: HashSet<DeviceKey> = self.sessions.iter().map(|s| s.key()).collect();

        for device in devices {
            let key = device.key();
            let descriptor = match device.descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("Unable to get device descriptor of {}: {}", key, e);
                    // Stays in `missing`, so a tracked session is dropped.
                    continue;
                }
            };

            if missing.remove(&key) {
                continue;
            }
            if self.sessions.iter().any(|s| s.key() == key) {
                continue;
            }
            if !descriptor.identity().is_supported() {
                continue;
            }

            debug!("Found {} at {}", descriptor.identity(), key);
            self.sessions
                .push(DeviceSession::new(device, &descriptor, self.config.clone()));
        }

        if !missing.is_empty() {
            self.sessions.retain(|session| {
                let gone = missing.contains(&session.key());
                if gone {
                    info!("Device {} '{}' removed", session.key(), session.name());
                }
                !gone
            });
        }

        let changed = self.sessions.len() != before;
        if changed {
            info!("Tracking {} SUIDI device(s)", self.sessions.len());
        }
        changed
    }

    /// Tracked sessions, in discovery order
    pub fn sessions(&self) -> &[DeviceSession<B::Device>] {
        &self.sessions
    }

    pub fn session(&self, index: usize) -> Option<&DeviceSession<B::Device>> {
        self.sessions.get(index)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session, closing all devices
    pub fn clear(&mut self) {
        if !self.sessions.is_empty() {
            debug!("Releasing {} device session(s)", self.sessions.len());
        }
        self.sessions.clear();
    }
}

impl<B: UsbBus> Drop for DeviceRegistry<B> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBus, MockDevice};
    use protocol::{SUIDI_VENDOR_ID, TimerGranularity};

    fn registry(bus: &MockBus) -> DeviceRegistry<MockBus> {
        let config = SessionConfig {
            granularity: Some(TimerGranularity::Good),
            ..SessionConfig::default()
        };
        DeviceRegistry::new(bus.clone(), config)
    }

    #[test]
    fn test_empty_bus() {
        let bus = MockBus::new();
        let mut registry = registry(&bus);
        assert!(!registry.rescan().unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsupported_devices_ignored() {
        let bus = MockBus::new();
        bus.plug(MockDevice::new(1, 2, 0x046d, 0xc52b));
        bus.plug(MockDevice::new(1, 3, SUIDI_VENDOR_ID, 0x9999));

        let mut registry = registry(&bus);
        assert!(!registry.rescan().unwrap());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_descriptor_failure_skips_device() {
        let bus = MockBus::new();
        bus.plug(MockDevice::suidi(1, 2).with_descriptor_error(common::UsbError::Pipe));
        bus.plug(MockDevice::suidi(1, 3));

        let mut registry = registry(&bus);
        assert!(registry.rescan().unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.session(0).unwrap().key().address, 3);
    }

    #[test]
    fn test_duplicate_device_tracked_once() {
        let device = MockDevice::suidi(1, 2);
        let bus = MockBus::new();
        let mut registry = registry(&bus);

        assert!(registry.reconcile(vec![device.clone(), device.clone()]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_enumeration_failure_is_error() {
        let bus = MockBus::new();
        bus.fail_enumeration(true);
        let mut registry = registry(&bus);
        assert!(registry.rescan().is_err());
    }
}
