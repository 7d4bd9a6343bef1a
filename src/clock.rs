use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("system clock is before the UNIX epoch")]
    BeforeEpoch,
}

/// Time source used on the callback hot path. Monotonic reads must be
/// cheap and non-decreasing; realtime may fail with a system error.
pub trait Clock: Send + Sync {
    /// Nanoseconds from an unspecified epoch. Non-decreasing across
    /// threads, suitable for short interval measurement.
    fn monotonic_ns(&self) -> u64;

    fn realtime(&self) -> Result<Timestamp, ClockError>;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn realtime(&self) -> Result<Timestamp, ClockError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| ClockError::BeforeEpoch)?;
        Ok(Timestamp {
            seconds: now.as_secs(),
            nanoseconds: now.subsec_nanos(),
        })
    }
}

/// Manually advanced clock for tests and benchmarks.
pub struct FakeClock {
    mono_ns: AtomicU64,
    real_seconds: AtomicU64,
    real_nanoseconds: AtomicU32,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            mono_ns: AtomicU64::new(0),
            real_seconds: AtomicU64::new(0),
            real_nanoseconds: AtomicU32::new(0),
        }
    }

    pub fn advance_ns(&self, delta: u64) {
        self.mono_ns.fetch_add(delta, AtomicOrdering::SeqCst);
    }

    pub fn set_realtime(&self, ts: Timestamp) {
        self.real_seconds.store(ts.seconds, AtomicOrdering::SeqCst);
        self.real_nanoseconds
            .store(ts.nanoseconds, AtomicOrdering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn monotonic_ns(&self) -> u64 {
        self.mono_ns.load(AtomicOrdering::SeqCst)
    }

    fn realtime(&self) -> Result<Timestamp, ClockError> {
        Ok(Timestamp {
            seconds: self.real_seconds.load(AtomicOrdering::SeqCst),
            nanoseconds: self.real_nanoseconds.load(AtomicOrdering::SeqCst),
        })
    }
}

/// Measures the smallest observed cost of a monotonic read so benchmark
/// loops can subtract the clock's own overhead.
pub fn calibrate_clock_overhead(clock: &dyn Clock, samples: usize) -> u64 {
    let mut min = u64::MAX;
    for _ in 0..samples.max(1) {
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        min = min.min(b.saturating_sub(a));
    }
    min
}
