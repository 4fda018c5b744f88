//! Discardable shared memory.
//!
//! A [`DiscardableRegion`] is a shared mapping that any process may purge while no process
//! has it locked, without a central arbiter. Coordination happens through one atomic word
//! at the start of the mapping (see `discard_shared`):
//!
//! - [`DiscardableRegion::lock`] / [`DiscardableRegion::unlock`]: page-granular locking on
//!   top of a single cross-process logical lock
//! - [`DiscardableRegion::purge`]: retryable compare-and-swap that marks unlocked memory
//!   as discarded
//! - [`SharedRegion`]: the backing memory, either [`MemfdRegion`] (Linux) or the portable
//!   in-process [`AnonRegion`]

mod clock;
mod discardable;
mod error;
mod page;
mod page_lock_set;
mod pin;
mod region;

pub use clock::{Clock, FakeClock, SystemClock};
pub use discardable::{DiscardableOptions, DiscardableRegion, LockResult};
pub use error::{Result, ShmError};
pub use page::{align_to_page_size, header_size, page_size};
pub use page_lock_set::PageLockSet;
pub use pin::{NoPin, PinHook, PinStatus};
pub use region::{AnonRegion, DefaultRegion, SharedRegion};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use region::MemfdRegion;

pub use discard_shared::{SharedState, Timestamp};
