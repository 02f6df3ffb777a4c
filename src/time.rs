//! Clock abstraction for TTL and window arithmetic
//!
//! Every expiry decision in the engine (rate-limit windows, CSRF token
//! lifetimes, cache TTLs, sweeper passes) reads the clock through a
//! pluggable [`TimeSource`] so tests can drive a manual clock instead of
//! sleeping.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering::Relaxed}
};
use std::time::Instant;

pub(crate) const MILLIS_PER_SEC: u64 = 1_000;

/// A source of time used by the engine's stateful subsystems.
///
/// Time is expressed in **milliseconds** and must be **monotonic**
/// (non-decreasing).
pub trait TimeSource: Send + Sync + 'static {
    /// Returns a monotonic timestamp in milliseconds.
    fn now_millis(&self) -> u64;

    /// Returns the current timestamp truncated to whole seconds.
    #[inline(always)]
    fn now_secs(&self) -> u64 {
        self.now_millis() / MILLIS_PER_SEC
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    #[inline]
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// Monotonic system time source backed by `Instant`.
///
/// Uses a process-wide start anchor and returns elapsed milliseconds since
/// that anchor, avoiding wall-clock jumps (NTP, manual adjustments, etc.).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    #[inline]
    fn anchor() -> Instant {
        // A stable anchor shared across calls for the process lifetime.
        static START: OnceLock<Instant> = OnceLock::new();
        *START.get_or_init(Instant::now)
    }
}

impl TimeSource for SystemTimeSource {
    #[inline]
    fn now_millis(&self) -> u64 {
        Self::anchor()
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

/// A manually advanced clock for deterministic tests.
///
/// # Example
/// ```
/// use sluice::time::{MockTimeSource, TimeSource};
///
/// let clock = MockTimeSource::new(1_000);
/// clock.advance_secs(60);
///
/// assert_eq!(clock.now_secs(), 1_060);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Creates a mock clock starting at `initial_secs` seconds.
    pub fn new(initial_secs: u64) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(initial_secs * MILLIS_PER_SEC)),
        }
    }

    /// Moves the clock forward by `millis`.
    pub fn advance_millis(&self, millis: u64) {
        self.current.fetch_add(millis, Relaxed);
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance_secs(&self, seconds: u64) {
        self.advance_millis(seconds * MILLIS_PER_SEC);
    }
}

impl TimeSource for MockTimeSource {
    #[inline]
    fn now_millis(&self) -> u64 {
        self.current.load(Relaxed)
    }
}
