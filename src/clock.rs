use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock timestamps for expiry decisions.
///
/// This trait allows the embedding to choose between standard wall-clock
/// time and TSC-based time (faster, monotonic, but requires calibration).
/// Timestamps are whole seconds since the UNIX epoch; entry time-to-live
/// comparisons never need finer resolution.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time in seconds since the UNIX epoch.
    fn now(&self) -> i64;
}

/// A clock that uses `std::time::SystemTime`.
///
/// This is the default implementation. It is susceptible to NTP adjustments
/// but requires no calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch");
        i64::try_from(timestamp.as_secs()).expect("system time exceeds timestamp range")
    }
}

/// A clock that uses the CPU's Time-Stamp Counter (TSC) via the `quanta` crate.
///
/// Anchors to SystemTime at initialization and then uses TSC ticks to
/// progress, ensuring no backward jumps between calls from the same process.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_s: i64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        let start_wall_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_secs() as i64;

        Self {
            clock,
            start_wall_s,
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> i64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_s + delta.as_secs() as i64
    }
}
