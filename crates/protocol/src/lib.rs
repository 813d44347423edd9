//! Wire-level definitions for SUIDI DMX interfaces
//!
//! This crate holds everything about the device family that does not need
//! I/O: which USB identifiers belong to the family, how a 512-channel DMX
//! universe is framed into the vendor's 576-byte bulk packet, and the fixed
//! end-of-frame control strobe.
//!
//! # Example
//!
//! ```
//! use protocol::{DMX_CHANNELS, PACKET_SIZE, frame};
//!
//! let mut channels = [0u8; DMX_CHANNELS];
//! channels[0] = 255;
//!
//! let packet = frame(&channels);
//! assert_eq!(packet.len(), PACKET_SIZE);
//! assert_eq!(packet[0], 0); // sub-block header
//! assert_eq!(packet[1], 255); // channel 1
//! assert_eq!(packet[PACKET_SIZE - 1], 0xFF);
//! ```

pub mod codec;
pub mod devices;
pub mod error;
pub mod types;

pub use codec::{
    DMX_CHANNELS, END_OF_FRAME_STROBE, PACKET_SIZE, PACKET_TERMINATOR, Packet, SUB_BLOCK_COUNT,
    SUB_BLOCK_PAYLOAD, SUB_BLOCK_SIZE, blank_packet, channel_offset, frame, frame_into,
    frame_slice,
};
pub use devices::{
    DEFAULT_ENDPOINT, DESCRIPTOR_TYPE_ENDPOINT, DMX_INTERFACE, ENDPOINT_DIR_IN, MAX_UNIVERSES,
    SUPPORTED_PRODUCT_IDS, SUIDI_VENDOR_ID, is_supported_device,
};
pub use error::{ProtocolError, Result};
pub use types::{ControlRequest, DeviceIdentity, OutputSummary, TimerGranularity};
