use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Source of "now" for timestamps, retention checks and rate limiting.
pub trait Time: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Blocks the calling thread for `duration` as measured by this clock.
    fn sleep(&self, duration: Duration);
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallTime;

impl Time for WallTime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A manually driven clock. Sleeping advances the clock instead of blocking.
#[derive(Debug)]
pub struct FakeTime {
    now: Mutex<DateTime<Utc>>,
}

impl FakeTime {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn tick(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Default for FakeTime {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::new(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }
}

impl Time for FakeTime {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.tick(duration);
    }
}
