//! SUIDI DMX output engine
//!
//! Discovers SUIDI USB-DMX interfaces, exposes one output per universe
//! (bulk-OUT endpoint), and streams framed universes to each open device from
//! a dedicated pacing thread.
//!
//! The engine is written against the USB capability traits in
//! [`common::usb_types`]; [`usb::rusb_backend`] provides the libusb-backed
//! implementation used by the `suidi-dmx` binary.

pub mod config;
pub mod outputs;
pub mod settings;
pub mod usb;

pub use config::DaemonConfig;
pub use outputs::OutputMap;
pub use settings::{ConfigFrequencyStore, FrequencyStore, MemoryFrequencyStore};
pub use usb::{DeviceRegistry, DeviceSession, SessionConfig, SessionError};
