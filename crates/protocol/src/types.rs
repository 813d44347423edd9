//! Shared value types
//!
//! Types passed between the output engine, the worker bridge and the CLI.

use crate::devices::is_supported_device;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// USB vendor/product pair of a device
///
/// Only used to decide whether a device is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Whether this identity belongs to the supported device family
    pub fn is_supported(&self) -> bool {
        is_supported_device(self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Measured resolution of the system sleep timer
///
/// Decides how the pacing loop waits out the rest of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerGranularity {
    /// Not measured yet (device never opened)
    #[default]
    Unknown,
    /// Short sleeps return close to on time
    Good,
    /// Short sleeps overshoot noticeably
    Bad,
}

impl fmt::Display for TimerGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerGranularity::Unknown => write!(f, "Unknown"),
            TimerGranularity::Good => write!(f, "Good"),
            TimerGranularity::Bad => write!(f, "Bad"),
        }
    }
}

impl FromStr for TimerGranularity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(TimerGranularity::Unknown),
            "good" => Ok(TimerGranularity::Good),
            "bad" => Ok(TimerGranularity::Bad),
            _ => Err(ProtocolError::UnknownGranularity(s.to_string())),
        }
    }
}

/// Fixed parameters of a vendor control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// Data stage length
    pub length: usize,
    /// Per-call timeout
    pub timeout: Duration,
}

/// One output (universe) as listed to a host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSummary {
    /// Output index used for open/close/write
    pub index: u32,
    /// Display name ("<device>" or "<device> U<n>")
    pub name: String,
    /// Zero-based universe on the device
    pub universe: u8,
    /// Human-readable device information
    pub info: String,
}
