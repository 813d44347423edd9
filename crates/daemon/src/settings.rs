//! Persisted frame frequency
//!
//! The frame frequency outlives device sessions: a session reads it when the
//! device is discovered and writes it back when the device goes away.

use crate::config::DaemonConfig;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Storage for the DMX frame frequency
pub trait FrequencyStore: Send + Sync {
    /// Persisted frequency in Hz, if any
    fn load(&self) -> Option<f64>;

    /// Persist a frequency in Hz
    fn store(&self, frequency_hz: f64) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryFrequencyStore {
    value: Mutex<Option<f64>>,
    writes: AtomicUsize,
}

impl MemoryFrequencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frequency(frequency_hz: f64) -> Self {
        Self {
            value: Mutex::new(Some(frequency_hz)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `store` calls so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn value(&self) -> MutexGuard<'_, Option<f64>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrequencyStore for MemoryFrequencyStore {
    fn load(&self) -> Option<f64> {
        *self.value()
    }

    fn store(&self, frequency_hz: f64) -> Result<()> {
        *self.value() = Some(frequency_hz);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store backed by `output.frequency_hz` of the configuration file
///
/// A missing file reads as "nothing persisted" and is created with defaults
/// on the first write. The file is only rewritten when the value changes.
#[derive(Debug)]
pub struct ConfigFrequencyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ConfigFrequencyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<DaemonConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        DaemonConfig::load_from(&self.path).map(Some)
    }
}

impl FrequencyStore for ConfigFrequencyStore {
    fn load(&self) -> Option<f64> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read() {
            Ok(config) => config.map(|c| c.output.frequency_hz),
            Err(e) => {
                warn!("Unable to read persisted frequency: {:#}", e);
                None
            }
        }
    }

    fn store(&self, frequency_hz: f64) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut config = self.read()?.unwrap_or_default();
        if self.path.exists() && config.output.frequency_hz == frequency_hz {
            return Ok(());
        }

        config.output.frequency_hz = frequency_hz;
        config.save(&self.path)?;
        debug!(
            "Persisted frequency {} Hz to {}",
            frequency_hz,
            self.path.display()
        );
        Ok(())
    }
}
