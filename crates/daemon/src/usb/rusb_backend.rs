//! libusb-backed implementation of the USB capability traits

use common::{DeviceDescriptorInfo, DeviceKey, RawEndpoint, UsbBus, UsbDevice, UsbError, UsbHandle};
use protocol::{DESCRIPTOR_TYPE_ENDPOINT, DMX_INTERFACE};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::debug;

/// The system USB bus
pub struct RusbBus {
    context: Context,
}

impl RusbBus {
    /// Create a libusb context
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }
}

impl UsbBus for RusbBus {
    type Device = RusbDevice;

    fn devices(&self) -> Result<Vec<RusbDevice>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        Ok(devices
            .iter()
            .map(|device| RusbDevice { device })
            .collect())
    }
}

/// A device on the system bus
pub struct RusbDevice {
    device: Device<Context>,
}

impl UsbDevice for RusbDevice {
    type Handle = RusbHandle;

    fn key(&self) -> DeviceKey {
        DeviceKey {
            bus: self.device.bus_number(),
            address: self.device.address(),
        }
    }

    fn descriptor(&self) -> Result<DeviceDescriptorInfo, UsbError> {
        let descriptor = self.device.device_descriptor().map_err(map_rusb_error)?;
        Ok(DeviceDescriptorInfo {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            product_string_index: descriptor.product_string_index(),
        })
    }

    fn open(&self) -> Result<RusbHandle, UsbError> {
        let handle = self.device.open().map_err(map_rusb_error)?;
        Ok(RusbHandle { handle })
    }

    fn interface_endpoints(&self) -> Result<Vec<RawEndpoint>, UsbError> {
        let config = self
            .device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;

        let interface = config
            .interfaces()
            .find(|interface| interface.number() == DMX_INTERFACE)
            .ok_or(UsbError::NotFound)?;
        let setting = interface
            .descriptors()
            .find(|setting| setting.setting_number() == 0)
            .ok_or(UsbError::NotFound)?;

        // libusb only hands out parsed endpoint descriptors here
        Ok(setting
            .endpoint_descriptors()
            .map(|endpoint| RawEndpoint {
                descriptor_type: DESCRIPTOR_TYPE_ENDPOINT,
                address: endpoint.address(),
                max_packet_size: endpoint.max_packet_size(),
            })
            .collect())
    }
}

/// An open device on the system bus
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
}

impl UsbHandle for RusbHandle {
    fn product_string(&self, descriptor: &DeviceDescriptorInfo) -> Result<String, UsbError> {
        let index = descriptor.product_string_index.ok_or(UsbError::NotFound)?;
        self.handle
            .read_string_descriptor_ascii(index)
            .map_err(map_rusb_error)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        // Unsupported on some platforms; claiming reports the real problem.
        if let Err(e) = self.handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
            .map_err(map_rusb_error)
    }
}

/// Map rusb errors onto the capability error taxonomy
pub fn map_rusb_error(e: rusb::Error) -> UsbError {
    match e {
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        other => UsbError::Other(other.to_string()),
    }
}
