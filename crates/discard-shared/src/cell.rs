//! Word-sized atomic cell holding the encoded [`SharedState`](crate::SharedState).
//!
//! The cell normally lives at offset 0 of a shared mapping, but the protocol only needs
//! load/store/compare-exchange, so tests can drive it with a plain atomic.

#[cfg(all(feature = "loom", test))]
use loom::sync::atomic::{AtomicU32, AtomicU64};
#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::{AtomicU32, AtomicU64};

use std::sync::atomic::Ordering;

use crate::WireWidth;

pub trait StateCell {
    const WIDTH: WireWidth;

    fn load(&self, order: Ordering) -> u64;

    fn store(&self, value: u64, order: Ordering);

    /// Returns the previous value on success and the observed value on failure.
    fn compare_exchange(
        &self,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64>;
}

impl StateCell for AtomicU32 {
    const WIDTH: WireWidth = WireWidth::Narrow;

    fn load(&self, order: Ordering) -> u64 {
        u64::from(AtomicU32::load(self, order))
    }

    fn store(&self, value: u64, order: Ordering) {
        debug_assert!(value <= u64::from(u32::MAX));
        AtomicU32::store(self, value as u32, order)
    }

    fn compare_exchange(
        &self,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64> {
        debug_assert!(current <= u64::from(u32::MAX) && new <= u64::from(u32::MAX));
        AtomicU32::compare_exchange(self, current as u32, new as u32, success, failure)
            .map(u64::from)
            .map_err(u64::from)
    }
}

impl StateCell for AtomicU64 {
    const WIDTH: WireWidth = WireWidth::Wide;

    fn load(&self, order: Ordering) -> u64 {
        AtomicU64::load(self, order)
    }

    fn store(&self, value: u64, order: Ordering) {
        AtomicU64::store(self, value, order)
    }

    fn compare_exchange(
        &self,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64> {
        AtomicU64::compare_exchange(self, current, new, success, failure)
    }
}

/// The cell type whose width matches the target's machine word.
#[cfg(target_pointer_width = "64")]
pub type NativeCell = AtomicU64;
#[cfg(not(target_pointer_width = "64"))]
pub type NativeCell = AtomicU32;

/// Bytes occupied by the shared word at the start of a mapping.
pub const NATIVE_CELL_BYTES: usize = core::mem::size_of::<NativeCell>();
