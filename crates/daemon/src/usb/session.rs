//! Device session
//!
//! A session tracks one attached SUIDI interface. It owns the device, the
//! universe slots found during discovery, and (while at least one universe is
//! open) the claimed communication handle plus the pacing thread streaming
//! over it.
//!
//! Opening the first universe acquires the handle and starts pacing; closing
//! the last one stops pacing and releases the handle. The handle is shared
//! with the pacing thread through an `Arc` and is only released after that
//! thread has been joined.

use crate::settings::{FrequencyStore, MemoryFrequencyStore};
use crate::usb::enumerate::{Enumeration, enumerate};
use crate::usb::pacing::{
    DEFAULT_FREQUENCY_HZ, DEFAULT_TRANSFER_TIMEOUT, GranularityCell, Pacer, PacingSettings,
};
use crate::usb::is_valid_frequency;
use common::{DeviceDescriptorInfo, DeviceKey, UsbDevice, UsbError, UsbHandle};
use protocol::{DMX_CHANNELS, DMX_INTERFACE, Packet, TimerGranularity, blank_packet, frame};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Info text of an output whose device holds no handle
pub const NOT_IN_USE: &str = "Device not in use";

/// Session operation failure
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("universe {index} out of range (device has {count})")]
    UniverseOutOfRange { index: usize, count: usize },

    #[error("unable to open device: {0}")]
    Open(UsbError),

    #[error("unable to claim interface: {0}")]
    Claim(UsbError),

    #[error("unable to start pacing thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Parameters shared by every session of a registry
#[derive(Clone)]
pub struct SessionConfig {
    /// Where the frame frequency is persisted
    pub store: Arc<dyn FrequencyStore>,
    /// Timeout of each bulk transfer
    pub transfer_timeout: Duration,
    /// Skip calibration and use this granularity
    pub granularity: Option<TimerGranularity>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryFrequencyStore::new()),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            granularity: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("transfer_timeout", &self.transfer_timeout)
            .field("granularity", &self.granularity)
            .finish_non_exhaustive()
    }
}

/// One universe of a device: an OUT endpoint and the packet streamed to it
///
/// The open flag and the packet are read by the pacing thread without
/// touching the session lock.
pub struct UniverseSlot {
    endpoint: u8,
    open: AtomicBool,
    packet: Mutex<Packet>,
}

impl UniverseSlot {
    pub fn new(endpoint: u8) -> Self {
        Self {
            endpoint,
            open: AtomicBool::new(false),
            packet: Mutex::new(blank_packet()),
        }
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    /// Copy of the current packet
    pub fn packet(&self) -> Packet {
        *self.packet.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the packet in one step
    pub fn store(&self, packet: Packet) {
        *self.packet.lock().unwrap_or_else(PoisonError::into_inner) = packet;
    }
}

impl fmt::Debug for UniverseSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniverseSlot")
            .field("endpoint", &format_args!("{:#04x}", self.endpoint))
            .field("open", &self.is_open())
            .finish()
    }
}

struct SessionState<H> {
    handle: Option<Arc<H>>,
    pacer: Option<Pacer>,
    open_count: usize,
}

/// An attached SUIDI interface
pub struct DeviceSession<D: UsbDevice> {
    device: D,
    key: DeviceKey,
    name: String,
    slots: Arc<[UniverseSlot]>,
    state: Mutex<SessionState<D::Handle>>,
    granularity: Arc<GranularityCell>,
    frequency_hz: f64,
    config: SessionConfig,
}

impl<D: UsbDevice> DeviceSession<D> {
    /// Discover the device's universes and read the persisted frequency
    pub fn new(device: D, descriptor: &DeviceDescriptorInfo, config: SessionConfig) -> Self {
        let frequency_hz = match config.store.load() {
            Some(hz) if is_valid_frequency(hz) => hz,
            Some(hz) => {
                warn!(
                    "Ignoring persisted frequency {} Hz, using {} Hz",
                    hz, DEFAULT_FREQUENCY_HZ
                );
                DEFAULT_FREQUENCY_HZ
            }
            None => DEFAULT_FREQUENCY_HZ,
        };

        let Enumeration { name, endpoints } = enumerate(&device, descriptor);
        let slots: Vec<UniverseSlot> = endpoints.into_iter().map(UniverseSlot::new).collect();

        info!(
            "Tracking {} '{}' ({}) with {} universe(s)",
            device.key(),
            name,
            descriptor.identity(),
            slots.len()
        );

        Self {
            key: device.key(),
            device,
            name,
            slots: slots.into(),
            state: Mutex::new(SessionState {
                handle: None,
                pacer: None,
                open_count: 0,
            }),
            granularity: Arc::new(GranularityCell::default()),
            frequency_hz,
            config,
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn universe_count(&self) -> usize {
        self.slots.len()
    }

    /// Endpoint addresses in universe order
    pub fn endpoints(&self) -> Vec<u8> {
        self.slots.iter().map(UniverseSlot::endpoint).collect()
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Granularity measured by the most recent pacing start
    pub fn granularity(&self) -> TimerGranularity {
        self.granularity.get()
    }

    pub fn is_open(&self, universe: usize) -> bool {
        self.slots.get(universe).is_some_and(UniverseSlot::is_open)
    }

    /// Whether the session holds a communication handle
    pub fn is_active(&self) -> bool {
        self.lock_state().handle.is_some()
    }

    /// Whether a pacing thread is running
    pub fn is_pacing(&self) -> bool {
        self.lock_state()
            .pacer
            .as_ref()
            .is_some_and(Pacer::is_running)
    }

    /// Number of open universes
    pub fn open_count(&self) -> usize {
        self.lock_state().open_count
    }

    /// Current packet of a universe
    pub fn packet(&self, universe: usize) -> Option<Packet> {
        self.slots.get(universe).map(UniverseSlot::packet)
    }

    /// Start streaming a universe
    ///
    /// Opening an already open universe does nothing. The first open
    /// universe acquires the device handle and starts the pacing thread.
    pub fn open(&self, universe: usize) -> Result<(), SessionError> {
        let slot = self.slot(universe)?;
        let mut state = self.lock_state();
        if slot.is_open() {
            return Ok(());
        }

        let handle = match state.handle.clone() {
            Some(handle) => handle,
            None => {
                let handle = Arc::new(self.acquire_handle()?);
                state.handle = Some(handle.clone());
                handle
            }
        };

        slot.set_open(true);
        state.open_count += 1;
        debug!(
            "Opened universe {} of {} ({} open)",
            universe + 1,
            self.key,
            state.open_count
        );

        if state.pacer.as_ref().is_some_and(Pacer::is_running) {
            return Ok(());
        }
        if let Some(stale) = state.pacer.take() {
            stale.stop();
        }

        match Pacer::spawn(
            self.key,
            handle,
            self.slots.clone(),
            self.pacing_settings(),
            self.granularity.clone(),
        ) {
            Ok(pacer) => {
                state.pacer = Some(pacer);
                Ok(())
            }
            Err(e) => {
                warn!("Unable to start pacing for {}: {}", self.key, e);
                slot.set_open(false);
                state.open_count -= 1;
                if state.open_count == 0 {
                    self.release(&mut state);
                }
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Stop streaming a universe
    ///
    /// Closing a universe that is not open does nothing. Closing the last
    /// open universe stops pacing and releases the device handle.
    pub fn close(&self, universe: usize) -> Result<(), SessionError> {
        let slot = self.slot(universe)?;
        let mut state = self.lock_state();
        if !slot.is_open() {
            return Ok(());
        }

        slot.set_open(false);
        state.open_count = state.open_count.saturating_sub(1);
        debug!(
            "Closed universe {} of {} ({} open)",
            universe + 1,
            self.key,
            state.open_count
        );

        if state.open_count == 0 {
            self.release(&mut state);
        }
        Ok(())
    }

    /// Close every universe
    pub fn close_all(&self) {
        let mut state = self.lock_state();
        for slot in self.slots.iter() {
            slot.set_open(false);
        }
        state.open_count = 0;
        self.release(&mut state);
    }

    /// Frame and store the channel data of a universe
    ///
    /// Takes effect on the next frame. Writing to a closed universe is
    /// allowed; the data is streamed once it is opened.
    pub fn write_channel_data(
        &self,
        universe: usize,
        channels: &[u8; DMX_CHANNELS],
    ) -> Result<(), SessionError> {
        self.write_packet(universe, frame(channels))
    }

    /// Store an already framed packet
    pub fn write_packet(&self, universe: usize, packet: Packet) -> Result<(), SessionError> {
        self.slot(universe)?.store(packet);
        Ok(())
    }

    /// Human-readable description for the host
    pub fn info_text(&self) -> String {
        if !self.is_active() {
            return NOT_IN_USE.to_string();
        }

        let accuracy = match self.granularity() {
            TimerGranularity::Unknown => "Patch this device to a universe to find out.".to_string(),
            known => known.to_string(),
        };

        format!(
            "Device name: {}\nDMX Channels: {}\nDMX Frame Frequency: {}Hz\nSystem Timer Accuracy: {}",
            self.name, DMX_CHANNELS, self.frequency_hz, accuracy
        )
    }

    fn slot(&self, universe: usize) -> Result<&UniverseSlot, SessionError> {
        self.slots
            .get(universe)
            .ok_or(SessionError::UniverseOutOfRange {
                index: universe,
                count: self.slots.len(),
            })
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState<D::Handle>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pacing_settings(&self) -> PacingSettings {
        PacingSettings {
            frequency_hz: self.frequency_hz,
            transfer_timeout: self.config.transfer_timeout,
            granularity: self.config.granularity,
        }
    }

    /// Open the device and claim the DMX interface
    fn acquire_handle(&self) -> Result<D::Handle, SessionError> {
        let mut handle = self.device.open().map_err(|e| {
            warn!("Unable to open {} ({}): {}", self.name, self.key, e);
            SessionError::Open(e)
        })?;

        // A failed claim drops the handle, closing the device again.
        handle.claim_interface(DMX_INTERFACE).map_err(|e| {
            warn!(
                "Unable to claim interface {} of {} ({}): {}",
                DMX_INTERFACE, self.name, self.key, e
            );
            SessionError::Claim(e)
        })?;

        debug!("Claimed interface {} of {}", DMX_INTERFACE, self.key);
        Ok(handle)
    }

    /// Stop pacing, then release and close the handle
    fn release(&self, state: &mut SessionState<D::Handle>) {
        if let Some(pacer) = state.pacer.take() {
            pacer.stop();
        }

        let Some(handle) = state.handle.take() else {
            return;
        };

        match Arc::try_unwrap(handle) {
            Ok(mut handle) => {
                if let Err(e) = handle.release_interface(DMX_INTERFACE) {
                    debug!("Unable to release interface of {}: {}", self.key, e);
                }
            }
            Err(_) => warn!("Handle of {} still shared after pacing stopped", self.key),
        }
        debug!("Closed {}", self.key);
    }
}

impl<D: UsbDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.close_all();
        if let Err(e) = self.config.store.store(self.frequency_hz) {
            warn!("Unable to persist frame frequency: {:#}", e);
        }
        debug!("Dropped session {}", self.key);
    }
}

impl<D: UsbDevice> fmt::Debug for DeviceSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("slots", &self.slots)
            .field("frequency_hz", &self.frequency_hz)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::MockDevice;

    fn session(device: &MockDevice) -> DeviceSession<MockDevice> {
        let descriptor = device.descriptor().unwrap();
        let config = SessionConfig {
            granularity: Some(TimerGranularity::Good),
            ..SessionConfig::default()
        };
        DeviceSession::new(device.clone(), &descriptor, config)
    }

    #[test]
    fn test_new_session_is_idle() {
        let device = MockDevice::suidi(1, 3).with_out_endpoints(&[0x01, 0x02]);
        let session = session(&device);

        assert_eq!(session.name(), "SUIDI Mock");
        assert_eq!(session.universe_count(), 2);
        assert_eq!(session.endpoints(), vec![0x01, 0x02]);
        assert!(!session.is_active());
        assert!(!session.is_pacing());
        assert_eq!(session.frequency_hz(), DEFAULT_FREQUENCY_HZ);
        assert_eq!(session.info_text(), NOT_IN_USE);
        assert_eq!(session.packet(0), Some(blank_packet()));
        // Discovery handle is already closed
        assert_eq!(device.open_handles(), 0);
    }

    #[test]
    fn test_universe_out_of_range() {
        let device = MockDevice::suidi(1, 3);
        let session = session(&device);

        assert!(matches!(
            session.open(1),
            Err(SessionError::UniverseOutOfRange { index: 1, count: 1 })
        ));
        assert!(session.close(4).is_err());
        assert!(session.write_channel_data(1, &[0; DMX_CHANNELS]).is_err());
        assert!(!session.is_active());
    }

    #[test]
    fn test_write_frames_channels() {
        let device = MockDevice::suidi(1, 3);
        let session = session(&device);

        let mut channels = [0u8; DMX_CHANNELS];
        channels[56] = 9;
        channels[57] = 10;
        session.write_channel_data(0, &channels).unwrap();

        let packet = session.packet(0).unwrap();
        assert_eq!(packet[57], 9);
        assert_eq!(packet[65], 10);
        assert_eq!(packet[64], 1);
    }

    #[test]
    fn test_info_text_while_active() {
        let device = MockDevice::suidi(1, 3).with_product("SUIDI One");
        let session = session(&device);
        session.open(0).unwrap();

        let info = session.info_text();
        assert!(info.contains("SUIDI One"));
        assert!(info.contains("DMX Channels: 512"));
        assert!(info.contains("DMX Frame Frequency: 100Hz"));
        assert!(info.contains("System Timer Accuracy:"));
        session.close(0).unwrap();
        assert_eq!(session.info_text(), NOT_IN_USE);
    }

    #[test]
    fn test_invalid_persisted_frequency_ignored() {
        let device = MockDevice::suidi(1, 3);
        let descriptor = device.descriptor().unwrap();
        let config = SessionConfig {
            store: Arc::new(MemoryFrequencyStore::with_frequency(-3.0)),
            ..SessionConfig::default()
        };
        let session = DeviceSession::new(device.clone(), &descriptor, config);
        assert_eq!(session.frequency_hz(), DEFAULT_FREQUENCY_HZ);
    }

    #[test]
    fn test_drop_persists_frequency() {
        let device = MockDevice::suidi(1, 3);
        let descriptor = device.descriptor().unwrap();
        let store = Arc::new(MemoryFrequencyStore::with_frequency(44.0));
        let config = SessionConfig {
            store: store.clone(),
            granularity: Some(TimerGranularity::Good),
            ..SessionConfig::default()
        };

        let session = DeviceSession::new(device.clone(), &descriptor, config);
        assert_eq!(session.frequency_hz(), 44.0);
        session.open(0).unwrap();
        drop(session);

        assert_eq!(store.writes(), 1);
        assert_eq!(store.load(), Some(44.0));
        assert_eq!(device.open_handles(), 0);
        assert_eq!(device.releases(), 1);
    }
}
