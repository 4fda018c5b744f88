use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use discard_shared::Timestamp;

/// Wall-clock source used to stamp unlocks.
///
/// Only second-granularity ordering is relied on, so occasional NTP steps are tolerated.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct FakeClock {
    micros: AtomicU64,
}

impl FakeClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicU64::new(start.as_micros()),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.micros.store(now.as_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let now = self.now().saturating_add(by);
        self.set(now);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}
