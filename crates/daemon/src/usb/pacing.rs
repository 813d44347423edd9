//! Frame pacing
//!
//! Each open device runs one pacing thread. Every frame it sends the packet of
//! each open universe to its endpoint, sends the end-of-frame strobe, and then
//! waits out the rest of the frame period.
//!
//! How it waits depends on the measured timer granularity. With a good timer
//! the thread sleeps in short slices. With a coarse timer a sleep could easily
//! overshoot a whole frame, so the thread spins instead and trades CPU time
//! for frame timing.

use crate::usb::session::UniverseSlot;
use common::{DeviceKey, UsbHandle};
use protocol::{END_OF_FRAME_STROBE, TimerGranularity};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Frame frequency used when none is persisted
pub const DEFAULT_FREQUENCY_HZ: f64 = 100.0;

/// Lowest accepted frame frequency
pub const MIN_FREQUENCY_HZ: f64 = 1.0;

/// Highest accepted frame frequency
pub const MAX_FREQUENCY_HZ: f64 = 1000.0;

/// Default timeout of one bulk transfer
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(100);

/// Sleep requested during calibration
pub const CALIBRATION_SLEEP: Duration = Duration::from_millis(1);

/// Largest calibration measurement still classified as good
pub const GRANULARITY_BOUND: Duration = Duration::from_millis(3);

/// Sleep slice used while waiting with a good timer
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Interval between checks while stopping a pacing thread
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls between "still waiting" warnings (about 2 seconds)
const STOP_WARN_POLLS: u32 = 400;

/// Target frame period: `round(1000 / frequency_hz)` milliseconds
///
/// Non-positive or non-finite frequencies fall back to
/// [`DEFAULT_FREQUENCY_HZ`].
pub fn frame_period(frequency_hz: f64) -> Duration {
    let hz = if frequency_hz.is_finite() && frequency_hz > 0.0 {
        frequency_hz
    } else {
        DEFAULT_FREQUENCY_HZ
    };
    Duration::from_millis((1000.0 / hz).round() as u64)
}

/// Whether `frequency_hz` is a usable frame frequency
pub fn is_valid_frequency(frequency_hz: f64) -> bool {
    frequency_hz.is_finite() && (MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency_hz)
}

/// Classify a calibration measurement
pub fn classify(elapsed: Duration) -> TimerGranularity {
    if elapsed <= GRANULARITY_BOUND {
        TimerGranularity::Good
    } else {
        TimerGranularity::Bad
    }
}

/// Classify the timer using a custom measurement
///
/// `measure` performs a [`CALIBRATION_SLEEP`] and returns the elapsed time.
pub fn calibrate_with(measure: impl FnOnce() -> Duration) -> TimerGranularity {
    classify(measure())
}

/// Measure the system sleep timer
pub fn calibrate() -> TimerGranularity {
    calibrate_with(|| {
        let started = Instant::now();
        std::thread::sleep(CALIBRATION_SLEEP);
        started.elapsed()
    })
}

/// How the rest of a frame is waited out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Short sleeps, yields the CPU
    Sleep,
    /// Busy wait, burns the CPU for accurate frame timing
    Spin,
}

impl From<TimerGranularity> for WaitStrategy {
    fn from(granularity: TimerGranularity) -> Self {
        match granularity {
            TimerGranularity::Bad => WaitStrategy::Spin,
            TimerGranularity::Good | TimerGranularity::Unknown => WaitStrategy::Sleep,
        }
    }
}

impl WaitStrategy {
    /// Wait until `period` has elapsed since `started`
    ///
    /// Returns `false` if `stop` was raised before the period ended.
    pub fn wait_until(self, started: Instant, period: Duration, stop: &StopSignal) -> bool {
        loop {
            if stop.is_raised() {
                return false;
            }
            let elapsed = started.elapsed();
            if elapsed >= period {
                return true;
            }
            match self {
                WaitStrategy::Sleep => std::thread::sleep(WAIT_SLICE.min(period - elapsed)),
                WaitStrategy::Spin => std::hint::spin_loop(),
            }
        }
    }
}

/// Cooperative stop request shared with a pacing thread
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Latest granularity classification of a session
#[derive(Debug, Default)]
pub struct GranularityCell(AtomicU8);

impl GranularityCell {
    pub fn get(&self) -> TimerGranularity {
        match self.0.load(Ordering::Acquire) {
            1 => TimerGranularity::Good,
            2 => TimerGranularity::Bad,
            _ => TimerGranularity::Unknown,
        }
    }

    pub fn set(&self, granularity: TimerGranularity) {
        let raw = match granularity {
            TimerGranularity::Unknown => 0,
            TimerGranularity::Good => 1,
            TimerGranularity::Bad => 2,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// Parameters of a pacing thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingSettings {
    /// Frame frequency in Hz
    pub frequency_hz: f64,
    /// Timeout of each bulk transfer
    pub transfer_timeout: Duration,
    /// Skip calibration and use this granularity
    pub granularity: Option<TimerGranularity>,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            granularity: None,
        }
    }
}

/// A running pacing thread
pub(crate) struct Pacer {
    thread: JoinHandle<()>,
    stop: StopSignal,
}

impl Pacer {
    /// Start streaming `slots` over `handle`
    pub(crate) fn spawn<H: UsbHandle>(
        key: DeviceKey,
        handle: Arc<H>,
        slots: Arc<[UniverseSlot]>,
        settings: PacingSettings,
        granularity: Arc<GranularityCell>,
    ) -> std::io::Result<Self> {
        let stop = StopSignal::new();
        let pacing = PacingLoop {
            key,
            failing: vec![false; slots.len()],
            strobe_failing: false,
            handle,
            slots,
            settings,
            granularity,
            stop: stop.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("dmx-{}", key))
            .spawn(move || pacing.run())?;

        debug!("Pacing thread for {} started", key);
        Ok(Self { thread, stop })
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Stop the thread and wait until it has exited
    ///
    /// On return the thread no longer touches the device handle.
    pub(crate) fn stop(self) {
        let mut polls = 0u32;
        loop {
            self.stop.raise();
            if self.thread.is_finished() {
                break;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
            polls += 1;
            if polls % STOP_WARN_POLLS == 0 {
                warn!(
                    "Still waiting for pacing thread {:?} to stop",
                    self.thread.thread().name()
                );
            }
        }

        if self.thread.join().is_err() {
            error!("Pacing thread panicked");
        }
    }
}

struct PacingLoop<H> {
    key: DeviceKey,
    handle: Arc<H>,
    slots: Arc<[UniverseSlot]>,
    settings: PacingSettings,
    granularity: Arc<GranularityCell>,
    stop: StopSignal,
    failing: Vec<bool>,
    strobe_failing: bool,
}

impl<H: UsbHandle> PacingLoop<H> {
    fn run(mut self) {
        let period = frame_period(self.settings.frequency_hz);

        // Also gives a freshly opened device a moment to settle.
        let granularity = self.settings.granularity.unwrap_or_else(calibrate);
        self.granularity.set(granularity);
        let strategy = WaitStrategy::from(granularity);

        info!(
            "Streaming {} at {} Hz ({} ms frames), timer granularity {}",
            self.key,
            self.settings.frequency_hz,
            period.as_millis(),
            granularity
        );

        let mut frames = 0u64;
        while !self.stop.is_raised() {
            let started = Instant::now();
            if self.transmit_frame() > 0 {
                frames += 1;
            }
            strategy.wait_until(started, period, &self.stop);
        }

        debug!("Pacing thread for {} stopped after {} frames", self.key, frames);
    }

    /// Send every open universe plus the strobe, returns universes sent
    fn transmit_frame(&mut self) -> usize {
        let mut sent = 0;

        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.is_open() {
                continue;
            }

            let packet = slot.packet();
            match self
                .handle
                .write_bulk(slot.endpoint(), &packet, self.settings.transfer_timeout)
            {
                Ok(written) => {
                    if written < packet.len() {
                        debug!(
                            "Short write on {} endpoint {:#04x}: {} of {} bytes",
                            self.key,
                            slot.endpoint(),
                            written,
                            packet.len()
                        );
                    }
                    if self.failing[index] {
                        info!("Universe {} of {} is writable again", index + 1, self.key);
                        self.failing[index] = false;
                    }
                }
                Err(e) => {
                    if !self.failing[index] {
                        warn!(
                            "Unable to write universe {} of {}: {}",
                            index + 1,
                            self.key,
                            e
                        );
                        self.failing[index] = true;
                    }
                }
            }
            sent += 1;
        }

        if sent > 0 {
            self.strobe();
        }
        sent
    }

    fn strobe(&mut self) {
        let mut buf = [0u8; END_OF_FRAME_STROBE.length];
        let result = self.handle.read_control(
            END_OF_FRAME_STROBE.request_type,
            END_OF_FRAME_STROBE.request,
            END_OF_FRAME_STROBE.value,
            END_OF_FRAME_STROBE.index,
            &mut buf,
            END_OF_FRAME_STROBE.timeout,
        );

        match result {
            Ok(_) if self.strobe_failing => {
                info!("End-of-frame strobe on {} recovered", self.key);
                self.strobe_failing = false;
            }
            Ok(_) => {}
            Err(e) if !self.strobe_failing => {
                warn!("Unable to send end-of-frame strobe to {}: {}", self.key, e);
                self.strobe_failing = true;
            }
            Err(_) => {}
        }
    }
}
