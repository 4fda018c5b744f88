#![allow(dead_code)]

use std::sync::Arc;

use discard::{DefaultRegion, DiscardableRegion, FakeClock, Timestamp};

pub type Region = DiscardableRegion<DefaultRegion>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn secs(secs: u64) -> Timestamp {
    Timestamp::from_secs(secs)
}

/// A peer with its own clock, standing in for a separate process.
pub struct Peer {
    pub region: Region,
    pub clock: Arc<FakeClock>,
}

impl Peer {
    pub fn create(size: usize) -> Self {
        let clock = Arc::new(FakeClock::new(secs(1)));
        let region = Region::create_and_map(size)
            .expect("create discardable region")
            .with_clock(clock.clone());
        Self { region, clock }
    }

    /// Attaches to `other`'s memory through a duplicated handle, the way a receiving
    /// process would.
    pub fn attach(other: &Peer, size: usize) -> Self {
        let clock = Arc::new(FakeClock::new(other.clock_now()));
        let handle = other.region.share().expect("share handle");
        let mut region = Region::from_region(handle).with_clock(clock.clone());
        region.map(size).expect("map shared handle");
        Self { region, clock }
    }

    pub fn clock_now(&self) -> Timestamp {
        use discard::Clock;
        self.clock.now()
    }

    pub fn unlock_all_at(&mut self, at: Timestamp) {
        self.clock.set(at);
        self.region.unlock(0, 0);
    }
}
