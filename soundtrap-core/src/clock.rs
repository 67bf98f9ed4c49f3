//! Monotonic time source.
//!
//! Everything time-dependent in the pipeline (trigger cooldown, post-roll
//! deadlines, block stamping) reads time through `Clock` so tests can drive
//! it deterministically with `ManualClock`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Supplies monotonic timestamps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            now: Arc::new(Mutex::new(origin)),
        }
    }

    /// The instant this clock started at.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Instant `offset` after the origin.
    pub fn at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to `origin + offset`. Never moves backwards.
    pub fn set(&self, offset: Duration) {
        let target = self.origin + offset;
        let mut now = self.now.lock();
        if target > *now {
            *now = target;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now(), clock.at(Duration::from_millis(250)));
    }

    #[test]
    fn manual_clock_set_never_moves_backwards() {
        let clock = ManualClock::new();
        clock.set(Duration::from_secs(2));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), clock.at(Duration::from_secs(2)));
    }
}
