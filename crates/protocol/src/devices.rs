//! Supported hardware
//!
//! Every interface in the family shares one vendor ID. Product IDs are an
//! explicit list: unknown products are never treated as compatible.

/// Vendor ID shared by the whole device family
pub const SUIDI_VENDOR_ID: u16 = 0x6244;

/// Accepted product IDs
pub const SUPPORTED_PRODUCT_IDS: [u16; 31] = [
    0x0301, 0x0302, 0x0303, 0x0401, 0x0411, 0x0531, 0x0532, 0x0421, 0x0431, 0x0441, 0x0511,
    0x0451, 0x0491, 0x0591, 0x0601, 0x0611, 0x0650, 0x0651, 0x0653, 0x0655, 0x0631, 0x0471,
    0x0461, 0x0501, 0x0521, 0x0481, 0x0541, 0x0561, 0x0571, 0x0581, 0x0621,
];

/// Maximum number of universes (bulk-OUT endpoints) used per device
pub const MAX_UNIVERSES: usize = 4;

/// Endpoint assumed when the configuration descriptor cannot be read
pub const DEFAULT_ENDPOINT: u8 = 0x01;

/// Interface carrying the DMX endpoints
pub const DMX_INTERFACE: u8 = 0;

/// Direction bit of an endpoint address (set = IN)
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// bDescriptorType of an endpoint descriptor
pub const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

/// Check whether a VID/PID pair belongs to the supported family
pub fn is_supported_device(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == SUIDI_VENDOR_ID && SUPPORTED_PRODUCT_IDS.contains(&product_id)
}
