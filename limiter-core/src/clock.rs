//! Time source and bounded polling.
//!
//! Every wait in the foreground is a [`Poll`]: a fixed granularity and an
//! explicit iteration bound, so a missing waveform or a stuck comparator can
//! never hang the control loop. The clock is injected, which lets the
//! simulation board advance virtual time deterministically.

use core::time::Duration;

/// Wrapping microsecond timestamp, the unit the trigger handlers record.
pub type Micros = u32;

/// Monotonic time source with a blocking delay.
pub trait Clock {
    /// Current time in microseconds (wraps).
    fn now(&self) -> Micros;

    /// Blocks the foreground for at least `duration`.
    fn delay(&mut self, duration: Duration);
}

/// Interval between two wrapping timestamps.
#[must_use]
pub fn elapsed(since: Micros, until: Micros) -> Duration {
    Duration::from_micros(u64::from(until.wrapping_sub(since)))
}

/// Bounded retry loop with a fixed wait granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Poll {
    granularity: Duration,
    max_iterations: u32,
}

impl Poll {
    /// Creates a poll with an explicit iteration bound.
    #[must_use]
    pub const fn new(granularity: Duration, max_iterations: u32) -> Self {
        Self {
            granularity,
            max_iterations,
        }
    }

    /// Creates a poll that gives up once `timeout` has been waited out.
    #[must_use]
    pub fn within(timeout: Duration, granularity: Duration) -> Self {
        let step = granularity.as_micros().max(1);
        let iterations = timeout.as_micros().div_ceil(step);
        Self::new(granularity, u32::try_from(iterations).unwrap_or(u32::MAX))
    }

    /// Returns the iteration bound.
    #[must_use]
    pub const fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Returns the wait between probes.
    #[must_use]
    pub const fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Probes until `probe` yields a value or the bound is exhausted.
    ///
    /// The probe runs once before the first wait and once after the last, so
    /// a `within(timeout)` poll observes the full timeout.
    pub fn until<T, R, F>(&self, target: &mut T, mut probe: F) -> Option<R>
    where
        T: Clock + ?Sized,
        F: FnMut(&mut T) -> Option<R>,
    {
        let mut remaining = self.max_iterations;
        loop {
            if let Some(value) = probe(target) {
                return Some(value);
            }
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            target.delay(self.granularity);
        }
    }
}
