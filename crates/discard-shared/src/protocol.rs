//! Lock/unlock/purge steps on the shared word.
//!
//! Every step is a single load, store or compare-exchange; none of them block or retry.
//! Callers keep a "last known usage" timestamp per peer: the value they believe the word
//! holds while unlocked. A failed compare-exchange refreshes that belief so the next attempt
//! compares against the current value instead of spinning blindly.

use std::sync::atomic::Ordering;

use crate::{SharedState, StateCell, Timestamp};

/// Publishes a freshly created word as locked.
pub fn initialize_locked<C: StateCell>(cell: &C) {
    cell.store(SharedState::Locked.encode(C::WIDTH), Ordering::Release);
}

/// Relaxed read of the current state. Advisory only.
pub fn snapshot<C: StateCell>(cell: &C) -> SharedState {
    SharedState::decode(cell.load(Ordering::Relaxed), C::WIDTH)
}

/// Tries to take the logical lock, expecting the word to be unlocked at `last_known_usage`.
///
/// A null `last_known_usage` means the caller has no basis to claim the lock (it is held
/// elsewhere or already purged), so this fails without touching the word. When the word
/// turns out to be unlocked at a different time, `last_known_usage` is refreshed.
pub fn try_acquire<C: StateCell>(cell: &C, last_known_usage: &mut Timestamp) -> bool {
    if last_known_usage.is_null() {
        return false;
    }

    let expected = SharedState::unlocked(*last_known_usage).encode(C::WIDTH);
    let desired = SharedState::Locked.encode(C::WIDTH);
    match cell.compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => true,
        Err(actual) => {
            match SharedState::decode(actual, C::WIDTH) {
                SharedState::Locked => {}
                observed => *last_known_usage = observed.timestamp(),
            }
            false
        }
    }
}

/// Drops the logical lock, recording `now` as the last usage.
///
/// The caller must be the current holder, so a plain store is enough.
pub fn release<C: StateCell>(cell: &C, now: Timestamp) {
    cell.store(SharedState::unlocked(now).encode(C::WIDTH), Ordering::Release);
}

/// Tries to mark the word purged, expecting it to be unlocked at `last_known_usage`.
///
/// On success `last_known_usage` becomes null. On failure it is refreshed: to
/// `current_time` if the word is locked (a fresh baseline for the next attempt), or to the
/// observed timestamp if it is unlocked at a different time.
pub fn try_purge<C: StateCell>(
    cell: &C,
    last_known_usage: &mut Timestamp,
    current_time: Timestamp,
) -> bool {
    let expected = SharedState::from_last_known_usage(*last_known_usage).encode(C::WIDTH);
    let desired = SharedState::Purged.encode(C::WIDTH);
    match cell.compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            *last_known_usage = Timestamp::NULL;
            true
        }
        Err(actual) => {
            *last_known_usage = match SharedState::decode(actual, C::WIDTH) {
                SharedState::Locked => current_time,
                observed => observed.timestamp(),
            };
            false
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, AtomicU64};

    fn t(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn acquire_without_basis_leaves_word_alone() {
        let cell = AtomicU64::new(0);
        release(&cell, t(5));
        let before = cell.load(Ordering::Relaxed);

        let mut usage = Timestamp::NULL;
        assert!(!try_acquire(&cell, &mut usage));
        assert_eq!(cell.load(Ordering::Relaxed), before);
        assert!(usage.is_null());
    }

    #[test]
    fn stale_acquire_refreshes_usage_then_succeeds() {
        let cell = AtomicU64::new(0);
        release(&cell, t(7));

        let mut usage = t(3);
        assert!(!try_acquire(&cell, &mut usage));
        assert_eq!(usage, t(7));
        assert!(try_acquire(&cell, &mut usage));
        assert_eq!(snapshot(&cell), SharedState::Locked);
    }

    #[test]
    fn acquire_against_locked_keeps_usage() {
        let cell = AtomicU32::new(0);
        initialize_locked(&cell);

        let mut usage = t(3);
        assert!(!try_acquire(&cell, &mut usage));
        assert_eq!(usage, t(3));
    }

    #[test]
    fn acquire_after_purge_clears_usage() {
        let cell = AtomicU64::new(0);
        release(&cell, t(2));
        let mut purger = t(2);
        assert!(try_purge(&cell, &mut purger, t(9)));

        let mut usage = t(2);
        assert!(!try_acquire(&cell, &mut usage));
        assert!(usage.is_null());
    }

    #[test]
    fn purge_of_locked_word_adopts_current_time() {
        let cell = AtomicU64::new(0);
        initialize_locked(&cell);

        let mut usage = Timestamp::NULL;
        assert!(!try_purge(&cell, &mut usage, t(11)));
        assert_eq!(usage, t(11));
        assert_eq!(snapshot(&cell), SharedState::Locked);
    }

    #[test]
    fn narrow_cell_round_trips_through_protocol() {
        let cell = AtomicU32::new(0);
        initialize_locked(&cell);
        release(&cell, Timestamp::from_micros(4_500_000));

        let mut usage = Timestamp::NULL;
        assert!(!try_purge(&cell, &mut usage, t(100)));
        assert_eq!(usage, t(4));
        assert!(try_purge(&cell, &mut usage, t(100)));
        assert_eq!(snapshot(&cell), SharedState::Purged);
    }
}
