//! Endpoint discovery
//!
//! Reads the product name and the OUT endpoint list of a device. Each kept
//! endpoint becomes one universe; descriptor order defines the universe
//! numbering a host application sees.

use common::{DeviceDescriptorInfo, RawEndpoint, UsbDevice, UsbHandle};
use protocol::{DEFAULT_ENDPOINT, DESCRIPTOR_TYPE_ENDPOINT, ENDPOINT_DIR_IN, MAX_UNIVERSES};
use tracing::{debug, warn};

/// Name used when the product string cannot be read
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Result of endpoint discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    /// Display name (product string or placeholder)
    pub name: String,
    /// OUT endpoint addresses, one per universe
    pub endpoints: Vec<u8>,
}

/// Discover the display name and universe endpoints of a device
///
/// Never fails: an unreadable product string yields a placeholder name and an
/// unreadable configuration yields a single default endpoint.
pub fn enumerate<D: UsbDevice>(device: &D, descriptor: &DeviceDescriptorInfo) -> Enumeration {
    let name = read_product_name(device, descriptor);

    let endpoints = match device.interface_endpoints() {
        Ok(raw) => out_endpoints(&raw),
        Err(e) => {
            warn!(
                "Unable to read configuration of {}: {}, assuming endpoint {:#04x}",
                device.key(),
                e,
                DEFAULT_ENDPOINT
            );
            vec![DEFAULT_ENDPOINT]
        }
    };

    debug!(
        "Device {} '{}' has {} universe(s): {:02x?}",
        device.key(),
        name,
        endpoints.len(),
        endpoints
    );

    Enumeration { name, endpoints }
}

/// Read the product string through a transient handle
fn read_product_name<D: UsbDevice>(device: &D, descriptor: &DeviceDescriptorInfo) -> String {
    // The handle is closed when it goes out of scope, on every path.
    let handle = match device.open() {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Unable to open {} to read product name: {}", device.key(), e);
            return UNKNOWN_DEVICE_NAME.to_string();
        }
    };

    match handle.product_string(descriptor) {
        Ok(name) => {
            let name = name.trim_end_matches('\0').trim();
            if name.is_empty() {
                warn!("Empty product name on {}", device.key());
                UNKNOWN_DEVICE_NAME.to_string()
            } else {
                name.to_string()
            }
        }
        Err(e) => {
            warn!("Unable to get product name of {}: {}", device.key(), e);
            UNKNOWN_DEVICE_NAME.to_string()
        }
    }
}

/// Keep endpoint descriptors with the OUT direction, capped at
/// [`MAX_UNIVERSES`]
pub fn out_endpoints(raw: &[RawEndpoint]) -> Vec<u8> {
    raw.iter()
        .filter(|ep| ep.descriptor_type == DESCRIPTOR_TYPE_ENDPOINT)
        .filter(|ep| ep.address & ENDPOINT_DIR_IN == 0)
        .map(|ep| ep.address)
        .take(MAX_UNIVERSES)
        .collect()
}
