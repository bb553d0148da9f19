//! Time source for the scan loop.
//!
//! Every suspension point (move settle, inter-round delay) goes through a
//! `Clock`, so the loop can be driven by virtual time in tests and dry runs.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Block the loop for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`.
#[derive(Clone, Debug)]
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual clock. `sleep` advances time instantly and is recorded.
///
/// Clones share the same timeline, so a fake camera can `advance` the clock
/// to simulate slow moves while the scheduler observes it.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut state) = self.inner.lock() {
            state.now += by;
        }
    }

    /// Every non-zero sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .map(|state| state.sleeps.clone())
            .unwrap_or_default()
    }

    /// Sum of all recorded sleeps.
    pub fn total_slept(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().map(|state| state.now).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        if let Ok(mut state) = self.inner.lock() {
            state.now += duration;
            state.sleeps.push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep_and_shares_timeline() {
        let clock = ManualClock::new();
        let other = clock.clone();

        clock.sleep(Duration::from_secs(2));
        other.advance(Duration::from_secs(3));
        clock.sleep(Duration::ZERO);

        assert_eq!(clock.now(), Duration::from_secs(5));
        assert_eq!(other.sleeps(), vec![Duration::from_secs(2)]);
        assert_eq!(clock.total_slept(), Duration::from_secs(2));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
