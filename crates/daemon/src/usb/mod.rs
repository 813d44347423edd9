//! USB subsystem
//!
//! Manages SUIDI device discovery, per-device sessions and frame pacing.
//!
//! This module implements the output engine, handling:
//! - Endpoint discovery (one universe per bulk-OUT endpoint)
//! - Reference-counted open/close of the shared device handle
//! - The real-time pacing thread that streams packets
//! - Reconciliation of tracked devices against the bus
//!
//! All registry work runs on a dedicated worker thread; each open device
//! additionally runs its own pacing thread.

pub mod enumerate;
pub mod manager;
pub mod pacing;
pub mod rusb_backend;
pub mod session;
pub mod worker;

pub use enumerate::{Enumeration, enumerate};
pub use manager::DeviceRegistry;
pub use pacing::{
    DEFAULT_FREQUENCY_HZ, DEFAULT_TRANSFER_TIMEOUT, PacingSettings, StopSignal, WaitStrategy,
    calibrate, frame_period, is_valid_frequency,
};
pub use rusb_backend::RusbBus;
pub use session::{DeviceSession, SessionConfig, SessionError, UniverseSlot};
pub use worker::{OutputWorkerThread, spawn_output_worker};
