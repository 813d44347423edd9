//! Test utilities for suidi-dmx
//!
//! Provides an in-memory USB bus implementing the traits in
//! [`crate::usb_types`], recording every open, claim and transfer so tests can
//! assert on what the output engine did.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBus, MockDevice};
//! use common::UsbBus;
//!
//! let bus = MockBus::new();
//! bus.plug(MockDevice::suidi(1, 4).with_out_endpoints(&[0x01, 0x02]));
//! assert_eq!(bus.devices().unwrap().len(), 1);
//! ```

use crate::usb_types::{
    DeviceDescriptorInfo, DeviceKey, RawEndpoint, UsbBus, UsbDevice, UsbError, UsbHandle,
};
use protocol::{DESCRIPTOR_TYPE_ENDPOINT, SUIDI_VENDOR_ID};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Product ID used by [`MockDevice::suidi`]
pub const MOCK_PRODUCT_ID: u16 = 0x0431;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Await a future with a timeout
pub async fn with_timeout<F, T>(
    timeout: Duration,
    future: F,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

/// A bulk transfer seen by a mock handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRecord {
    pub endpoint: u8,
    pub data: Vec<u8>,
}

/// A control transfer seen by a mock handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: usize,
}

/// Everything that happened on one transfer, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRecord {
    Bulk(BulkRecord),
    Control(ControlRecord),
}

struct MockDeviceConfig {
    descriptor: Result<DeviceDescriptorInfo, UsbError>,
    product: Result<String, UsbError>,
    endpoints: Result<Vec<RawEndpoint>, UsbError>,
}

#[derive(Default)]
struct MockDeviceCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    claims: AtomicUsize,
    releases: AtomicUsize,
}

#[derive(Default)]
struct MockFaults {
    open: AtomicBool,
    claim: AtomicBool,
    bulk: AtomicBool,
    control: AtomicBool,
}

struct MockDeviceShared {
    key: DeviceKey,
    config: Mutex<MockDeviceConfig>,
    counters: MockDeviceCounters,
    faults: MockFaults,
    transfers: Mutex<Vec<TransferRecord>>,
}

/// In-memory USB device
///
/// Clones share state, so a test can keep one clone and inspect what the
/// output engine did with another.
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<MockDeviceShared>,
}

impl MockDevice {
    /// Create a device with the given identity and no endpoints
    pub fn new(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            shared: Arc::new(MockDeviceShared {
                key: DeviceKey { bus, address },
                config: Mutex::new(MockDeviceConfig {
                    descriptor: Ok(DeviceDescriptorInfo {
                        vendor_id,
                        product_id,
                        product_string_index: Some(2),
                    }),
                    product: Ok(format!("Mock {:04x}", product_id)),
                    endpoints: Ok(Vec::new()),
                }),
                counters: MockDeviceCounters::default(),
                faults: MockFaults::default(),
                transfers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a supported interface with a single OUT endpoint
    pub fn suidi(bus: u8, address: u8) -> Self {
        Self::new(bus, address, SUIDI_VENDOR_ID, MOCK_PRODUCT_ID)
            .with_product("SUIDI Mock")
            .with_out_endpoints(&[0x01])
    }

    pub fn with_product(self, product: &str) -> Self {
        lock(&self.shared.config).product = Ok(product.to_string());
        self
    }

    pub fn with_product_error(self, error: UsbError) -> Self {
        lock(&self.shared.config).product = Err(error);
        self
    }

    /// Replace the endpoint list with plain endpoint descriptors
    pub fn with_out_endpoints(self, addresses: &[u8]) -> Self {
        let endpoints = addresses
            .iter()
            .map(|address| RawEndpoint {
                descriptor_type: DESCRIPTOR_TYPE_ENDPOINT,
                address: *address,
                max_packet_size: 64,
            })
            .collect();
        self.with_endpoints(endpoints)
    }

    pub fn with_endpoints(self, endpoints: Vec<RawEndpoint>) -> Self {
        lock(&self.shared.config).endpoints = Ok(endpoints);
        self
    }

    pub fn with_config_error(self, error: UsbError) -> Self {
        lock(&self.shared.config).endpoints = Err(error);
        self
    }

    pub fn with_descriptor_error(self, error: UsbError) -> Self {
        lock(&self.shared.config).descriptor = Err(error);
        self
    }

    pub fn fail_open(&self, fail: bool) {
        self.shared.faults.open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_claim(&self, fail: bool) {
        self.shared.faults.claim.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bulk(&self, fail: bool) {
        self.shared.faults.bulk.store(fail, Ordering::SeqCst);
    }

    pub fn fail_control(&self, fail: bool) {
        self.shared.faults.control.store(fail, Ordering::SeqCst);
    }

    /// Handles opened so far (including transient ones)
    pub fn opens(&self) -> usize {
        self.shared.counters.opens.load(Ordering::SeqCst)
    }

    /// Handles closed so far
    pub fn closes(&self) -> usize {
        self.shared.counters.closes.load(Ordering::SeqCst)
    }

    /// Handles currently open
    pub fn open_handles(&self) -> usize {
        self.opens() - self.closes()
    }

    pub fn claims(&self) -> usize {
        self.shared.counters.claims.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.shared.counters.releases.load(Ordering::SeqCst)
    }

    /// All successful transfers so far, in order
    pub fn transfers(&self) -> Vec<TransferRecord> {
        lock(&self.shared.transfers).clone()
    }

    /// Successful bulk transfers so far
    pub fn bulk_writes(&self) -> Vec<BulkRecord> {
        lock(&self.shared.transfers)
            .iter()
            .filter_map(|t| match t {
                TransferRecord::Bulk(b) => Some(b.clone()),
                TransferRecord::Control(_) => None,
            })
            .collect()
    }

    /// Successful control transfers so far
    pub fn control_transfers(&self) -> Vec<ControlRecord> {
        lock(&self.shared.transfers)
            .iter()
            .filter_map(|t| match t {
                TransferRecord::Control(c) => Some(*c),
                TransferRecord::Bulk(_) => None,
            })
            .collect()
    }

    /// Forget recorded transfers
    pub fn clear_transfers(&self) {
        lock(&self.shared.transfers).clear();
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn key(&self) -> DeviceKey {
        self.shared.key
    }

    fn descriptor(&self) -> Result<DeviceDescriptorInfo, UsbError> {
        lock(&self.shared.config).descriptor.clone()
    }

    fn open(&self) -> Result<MockHandle, UsbError> {
        if self.shared.faults.open.load(Ordering::SeqCst) {
            return Err(UsbError::Access);
        }
        self.shared.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            shared: self.shared.clone(),
        })
    }

    fn interface_endpoints(&self) -> Result<Vec<RawEndpoint>, UsbError> {
        lock(&self.shared.config).endpoints.clone()
    }
}

/// Open handle of a [`MockDevice`]; dropping it counts as a close
pub struct MockHandle {
    shared: Arc<MockDeviceShared>,
}

impl UsbHandle for MockHandle {
    fn product_string(&self, _descriptor: &DeviceDescriptorInfo) -> Result<String, UsbError> {
        lock(&self.shared.config).product.clone()
    }

    fn claim_interface(&mut self, _interface: u8) -> Result<(), UsbError> {
        if self.shared.faults.claim.load(Ordering::SeqCst) {
            return Err(UsbError::Busy);
        }
        self.shared.counters.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<(), UsbError> {
        self.shared.counters.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize, UsbError> {
        if self.shared.faults.bulk.load(Ordering::SeqCst) {
            return Err(UsbError::Timeout);
        }
        lock(&self.shared.transfers).push(TransferRecord::Bulk(BulkRecord {
            endpoint,
            data: data.to_vec(),
        }));
        Ok(data.len())
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        if self.shared.faults.control.load(Ordering::SeqCst) {
            return Err(UsbError::Pipe);
        }
        lock(&self.shared.transfers).push(TransferRecord::Control(ControlRecord {
            request_type,
            request,
            value,
            index,
            length: buf.len(),
        }));
        buf.fill(0);
        Ok(buf.len())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.shared.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockBusState {
    devices: Vec<MockDevice>,
    fail_enumeration: bool,
}

/// In-memory USB bus
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device
    pub fn plug(&self, device: MockDevice) {
        lock(&self.state).devices.push(device);
    }

    /// Detach the device with the given key
    pub fn unplug(&self, key: DeviceKey) {
        lock(&self.state).devices.retain(|d| d.key() != key);
    }

    /// Replace the attached device set
    pub fn set_devices(&self, devices: Vec<MockDevice>) {
        lock(&self.state).devices = devices;
    }

    /// Make enumeration fail until reset
    pub fn fail_enumeration(&self, fail: bool) {
        lock(&self.state).fail_enumeration = fail;
    }
}

impl UsbBus for MockBus {
    type Device = MockDevice;

    fn devices(&self) -> Result<Vec<MockDevice>, UsbError> {
        let state = lock(&self.state);
        if state.fail_enumeration {
            return Err(UsbError::Other("enumeration failed".to_string()));
        }
        Ok(state.devices.clone())
    }
}
