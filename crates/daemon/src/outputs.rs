//! Output map
//!
//! The host addresses universes by a flat output index. Every universe of
//! every tracked device gets one output, in device order then universe
//! order. The map is rebuilt after each reconciliation, so indices are only
//! stable between topology changes.

use crate::usb::manager::DeviceRegistry;
use crate::usb::session::{DeviceSession, NOT_IN_USE, SessionConfig};
use common::{UsbBus, UsbError};
use protocol::{OutputSummary, ProtocolError, frame_slice};
use tracing::{debug, warn};

/// Name shown for this output family
pub const PLUGIN_NAME: &str = "SUIDI";

#[derive(Debug, Clone, PartialEq, Eq)]
struct OutputEntry {
    session: usize,
    universe: usize,
    name: String,
}

/// Flat output index over all tracked devices
pub struct OutputMap<B: UsbBus> {
    registry: DeviceRegistry<B>,
    entries: Vec<OutputEntry>,
}

impl<B: UsbBus> OutputMap<B> {
    /// Create an empty map; call [`rescan`](Self::rescan) to discover devices
    pub fn new(bus: B, config: SessionConfig) -> Self {
        Self {
            registry: DeviceRegistry::new(bus, config),
            entries: Vec::new(),
        }
    }

    /// Reconcile against the bus and rebuild the output list
    ///
    /// Returns whether the set of devices changed. A failed enumeration
    /// leaves the tracked devices untouched.
    pub fn rescan(&mut self) -> Result<bool, UsbError> {
        let changed = self.registry.rescan()?;
        self.rebuild();
        Ok(changed)
    }

    /// Reconcile against an explicit device list
    pub fn reconcile(&mut self, devices: Vec<B::Device>) -> bool {
        let changed = self.registry.reconcile(devices);
        self.rebuild();
        changed
    }

    fn rebuild(&mut self) {
        self.entries.clear();
        for (index, session) in self.registry.sessions().iter().enumerate() {
            let count = session.universe_count();
            for universe in 0..count {
                let name = if count > 1 {
                    format!("{} U{}", session.name(), universe + 1)
                } else {
                    session.name().to_string()
                };
                self.entries.push(OutputEntry {
                    session: index,
                    universe,
                    name,
                });
            }
        }
        debug!("{} output(s) available", self.entries.len());
    }

    /// Output names, in index order
    pub fn outputs(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outputs with their info text
    pub fn summaries(&self) -> Vec<OutputSummary> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| OutputSummary {
                index: index as u32,
                name: entry.name.clone(),
                universe: entry.universe as u8,
                info: self.output_info(index as u32),
            })
            .collect()
    }

    /// Start streaming an output, returns false if it could not be opened
    pub fn open_output(&self, output: u32) -> bool {
        let Some((entry, session)) = self.resolve(output) else {
            debug!("Ignoring open of unknown output {}", output);
            return false;
        };

        match session.open(entry.universe) {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to open output {} '{}': {}", output, entry.name, e);
                false
            }
        }
    }

    /// Stop streaming an output
    pub fn close_output(&self, output: u32) {
        let Some((entry, session)) = self.resolve(output) else {
            debug!("Ignoring close of unknown output {}", output);
            return;
        };

        if let Err(e) = session.close(entry.universe) {
            warn!("Unable to close output {} '{}': {}", output, entry.name, e);
        }
    }

    /// Replace the channel data of an output
    ///
    /// Shorter data is padded with zeros. More than 512 channels is
    /// rejected. Unknown outputs are ignored.
    pub fn write_universe(&self, output: u32, data: &[u8]) -> Result<(), ProtocolError> {
        let packet = frame_slice(data).inspect_err(|e| {
            warn!("Rejected data for output {}: {}", output, e);
        })?;

        if let Some((entry, session)) = self.resolve(output) {
            // Only fails for a bad universe index, which rebuild rules out.
            if let Err(e) = session.write_packet(entry.universe, packet) {
                warn!("Unable to write output {}: {}", output, e);
            }
        }
        Ok(())
    }

    /// Info text of the device behind an output
    pub fn output_info(&self, output: u32) -> String {
        self.resolve(output)
            .map(|(_, session)| session.info_text())
            .unwrap_or_else(|| NOT_IN_USE.to_string())
    }

    /// Description of this output family
    pub fn plugin_info(&self) -> String {
        format!(
            "{}\nThis plugin provides DMX output support for SUIDI devices.",
            PLUGIN_NAME
        )
    }

    /// Tracked devices
    pub fn registry(&self) -> &DeviceRegistry<B> {
        &self.registry
    }

    /// Close every output and forget all devices
    pub fn shutdown(&mut self) {
        self.entries.clear();
        self.registry.clear();
    }

    fn resolve(&self, output: u32) -> Option<(&OutputEntry, &DeviceSession<B::Device>)> {
        let entry = self.entries.get(output as usize)?;
        let session = self.registry.session(entry.session)?;
        Some((entry, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBus, MockDevice};
    use protocol::TimerGranularity;

    fn output_map(bus: &MockBus) -> OutputMap<MockBus> {
        let config = SessionConfig {
            granularity: Some(TimerGranularity::Good),
            ..SessionConfig::default()
        };
        OutputMap::new(bus.clone(), config)
    }

    #[test]
    fn test_output_names() {
        let bus = MockBus::new();
        bus.plug(
            MockDevice::suidi(1, 2)
                .with_product("Quad")
                .with_out_endpoints(&[0x01, 0x02, 0x03, 0x04]),
        );
        bus.plug(MockDevice::suidi(1, 3).with_product("Single"));

        let mut map = output_map(&bus);
        assert!(map.rescan().unwrap());
        assert_eq!(
            map.outputs(),
            vec!["Quad U1", "Quad U2", "Quad U3", "Quad U4", "Single"]
        );
    }

    #[test]
    fn test_device_without_endpoints_lists_nothing() {
        let bus = MockBus::new();
        bus.plug(MockDevice::suidi(1, 2).with_out_endpoints(&[]));

        let mut map = output_map(&bus);
        assert!(map.rescan().unwrap());
        assert!(map.is_empty());
    }

    #[test]
    fn test_unknown_output_ignored() {
        let bus = MockBus::new();
        let map = output_map(&bus);

        assert!(!map.open_output(0));
        map.close_output(3);
        assert!(map.write_universe(7, &[1, 2, 3]).is_ok());
        assert_eq!(map.output_info(0), NOT_IN_USE);
    }

    #[test]
    fn test_write_universe_rejects_oversized() {
        let bus = MockBus::new();
        bus.plug(MockDevice::suidi(1, 2));
        let mut map = output_map(&bus);
        map.rescan().unwrap();

        let result = map.write_universe(0, &[0u8; 513]);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidChannelCount { actual: 513, .. })
        ));
    }

    #[test]
    fn test_write_universe_pads_short_data() {
        let bus = MockBus::new();
        bus.plug(MockDevice::suidi(1, 2));
        let mut map = output_map(&bus);
        map.rescan().unwrap();

        map.write_universe(0, &[7, 8]).unwrap();
        let packet = map.registry().session(0).unwrap().packet(0).unwrap();
        assert_eq!(&packet[..4], &[0, 7, 8, 0]);
    }

    #[test]
    fn test_plugin_info() {
        let map = output_map(&MockBus::new());
        assert!(map.plugin_info().starts_with("SUIDI"));
    }
}
