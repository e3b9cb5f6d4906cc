//! Delay calibration and interruptible sleeping
//!
//! All timing-dependent tests derive their waits from one short delay,
//! scaled by the configured delay factor. The other delays are fixed
//! multiples of it so that "did not wait" and "timed out" stay
//! distinguishable on slow machines.

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use static_assertions::const_assert;

use crate::error::{Failure, Interrupted};
use crate::interrupt;

/// Unscaled short delay, in milliseconds
pub const BASE_SHORT_DELAY_MS: u64 = 50;

pub const SMALL_MULTIPLIER: u32 = 5;
pub const MEDIUM_MULTIPLIER: u32 = 10;
pub const LONG_MULTIPLIER: u32 = 200;
pub const LONGER_MULTIPLIER: u32 = 2 * LONG_MULTIPLIER;

const_assert!(1 < SMALL_MULTIPLIER);
const_assert!(SMALL_MULTIPLIER < MEDIUM_MULTIPLIER);
const_assert!(MEDIUM_MULTIPLIER < LONG_MULTIPLIER);
const_assert!(LONG_MULTIPLIER < LONGER_MULTIPLIER);

/// The delays available to one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delays {
    pub short: Duration,
    pub small: Duration,
    pub medium: Duration,
    pub long: Duration,
    /// Significantly longer than `long`; use in threads that are waited
    /// for with a `long` bound
    pub longer: Duration,
}

impl Delays {
    /// Derive every delay from the scale factor
    ///
    /// The short delay is clamped to one millisecond so the ordering
    /// `short < small < medium < long < longer` holds for any factor.
    pub fn compute(factor: f32) -> Self {
        let scaled = (BASE_SHORT_DELAY_MS as f64 * factor as f64) as u64;
        let short = Duration::from_millis(scaled.max(1));
        Self {
            short,
            small: short * SMALL_MULTIPLIER,
            medium: short * MEDIUM_MULTIPLIER,
            long: short * LONG_MULTIPLIER,
            longer: short * LONGER_MULTIPLIER,
        }
    }

    /// Window used by tests that check an operation blocks or times out
    pub fn timeout(&self) -> Duration {
        self.short / 4
    }
}

impl Default for Delays {
    fn default() -> Self {
        Self::compute(1.0)
    }
}

/// Wait until `duration` has elapsed on the monotonic clock
///
/// Parks in between, re-parking after early wakeups. Returns
/// `Err(Interrupted)` and clears the flag if the thread is interrupted
/// before the time is up.
pub fn delay(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        if interrupt::interrupted() {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let remaining = deadline - now;
        if remaining < Duration::from_millis(1) {
            thread::yield_now();
        } else {
            thread::park_timeout(remaining);
        }
    }
}

/// Like [`delay`], but an interrupt fails the test
#[track_caller]
pub fn sleep(duration: Duration) {
    if delay(duration).is_err() {
        Failure::interrupted("Unexpected interrupt during sleep").raise();
    }
}

/// Whole milliseconds elapsed since `start`
pub fn millis_elapsed_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_delays() {
        let delays = Delays::default();
        assert_eq!(delays.short, Duration::from_millis(50));
        assert_eq!(delays.small, Duration::from_millis(250));
        assert_eq!(delays.medium, Duration::from_millis(500));
        assert_eq!(delays.long, Duration::from_millis(10_000));
        assert_eq!(delays.longer, Duration::from_millis(20_000));
        assert_eq!(delays.timeout(), Duration::from_micros(12_500));
    }

    #[test]
    fn test_tiny_factor_keeps_ordering() {
        let delays = Delays::compute(0.001);
        assert_eq!(delays.short, Duration::from_millis(1));
        assert!(delays.short < delays.small);
    }

    #[test]
    fn test_delay_waits_full_duration() {
        let start = Instant::now();
        delay(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_delay_returns_on_interrupt() {
        interrupt::current().interrupt();
        let start = Instant::now();
        assert_eq!(delay(Duration::from_secs(5)), Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!interrupt::is_interrupted());
    }

    proptest! {
        #[test]
        fn delays_are_ordered_fixed_multiples(factor in 0.01f32..50.0) {
            let d = Delays::compute(factor);
            prop_assert!(d.short < d.small);
            prop_assert!(d.small < d.medium);
            prop_assert!(d.medium < d.long);
            prop_assert!(d.long < d.longer);
            prop_assert_eq!(d.small, d.short * SMALL_MULTIPLIER);
            prop_assert_eq!(d.medium, d.short * MEDIUM_MULTIPLIER);
            prop_assert_eq!(d.long, d.short * LONG_MULTIPLIER);
            prop_assert_eq!(d.longer, d.short * LONGER_MULTIPLIER);
        }
    }
}
