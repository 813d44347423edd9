//! USB capability used by the output engine
//!
//! The output engine never talks to libusb directly. It needs a small set of
//! operations: list the devices on the bus, read their descriptors, open them,
//! claim an interface, and run bulk and control transfers. These traits
//! describe exactly that set, so the daemon can plug in a libusb-backed bus
//! and tests can plug in the in-memory `MockBus` (`test-utils` feature).

use protocol::DeviceIdentity;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// USB operation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Entity not found
    #[error("not found")]
    NotFound,
    /// Insufficient permissions
    #[error("access denied")]
    Access,
    /// Resource busy (interface claimed elsewhere)
    #[error("resource busy")]
    Busy,
    /// Transfer timed out
    #[error("timed out")]
    Timeout,
    /// Endpoint halted
    #[error("pipe error")]
    Pipe,
    /// Device disconnected
    #[error("no such device")]
    NoDevice,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Any other failure
    #[error("{0}")]
    Other(String),
}

/// Physical identity of a device on the bus
///
/// Re-plugging a device assigns it a new address, so a re-inserted device is
/// a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// The parts of a device descriptor the output engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptorInfo {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// iProduct string index, if the device has one
    pub product_string_index: Option<u8>,
}

impl DeviceDescriptorInfo {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.product_id)
    }
}

/// One endpoint descriptor as found in an interface's alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEndpoint {
    /// bDescriptorType
    pub descriptor_type: u8,
    /// bEndpointAddress (bit 7 set = IN)
    pub address: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
}

/// A USB bus that can be enumerated
pub trait UsbBus: Send + 'static {
    type Device: UsbDevice;

    /// List the devices currently attached
    fn devices(&self) -> Result<Vec<Self::Device>, UsbError>;
}

/// A device found on the bus (not necessarily opened)
pub trait UsbDevice: Send + Sync + 'static {
    type Handle: UsbHandle;

    /// Physical identity of this device
    fn key(&self) -> DeviceKey;

    /// Read the device descriptor
    fn descriptor(&self) -> Result<DeviceDescriptorInfo, UsbError>;

    /// Open a communication handle; dropping the handle closes it
    fn open(&self) -> Result<Self::Handle, UsbError>;

    /// Endpoint descriptors of interface 0, alternate setting 0 of the
    /// active configuration, in descriptor order
    fn interface_endpoints(&self) -> Result<Vec<RawEndpoint>, UsbError>;
}

/// An open device
pub trait UsbHandle: Send + Sync + 'static {
    /// Read the product string descriptor
    fn product_string(&self, descriptor: &DeviceDescriptorInfo) -> Result<String, UsbError>;

    /// Claim an interface for exclusive use
    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Release a claimed interface
    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Bulk OUT transfer, returns the number of bytes written
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError>;

    /// Control IN transfer, returns the number of bytes read
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_key_display() {
        let key = DeviceKey { bus: 1, address: 7 };
        assert_eq!(key.to_string(), "001:007");
    }

    #[test]
    fn test_descriptor_identity() {
        let descriptor = DeviceDescriptorInfo {
            vendor_id: 0x6244,
            product_id: 0x0431,
            product_string_index: Some(2),
        };
        assert!(descriptor.identity().is_supported());
    }

    #[test]
    fn test_usb_error_display() {
        assert_eq!(UsbError::Timeout.to_string(), "timed out");
        assert_eq!(UsbError::Other("boom".into()).to_string(), "boom");
    }
}
