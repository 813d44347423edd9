//! Common utilities for suidi-dmx
//!
//! This crate provides functionality shared between the output daemon and its
//! tests: the USB capability the output engine is written against, error
//! handling, logging setup, the async channel bridge to the output worker
//! thread, and an in-memory USB bus for tests.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb_types;

pub use channel::{OutputBridge, OutputCommand, OutputEvent, OutputWorker, create_output_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    DeviceDescriptorInfo, DeviceKey, RawEndpoint, UsbBus, UsbDevice, UsbError, UsbHandle,
};
