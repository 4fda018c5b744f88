//! Lock-free state word shared by every process that maps a discardable region.
//!
//! One machine word at the start of the region packs a lock flag and the time the region
//! was last unlocked. All cross-process coordination goes through atomic operations on that
//! word; see [`protocol`] for the individual steps.

mod cell;
pub mod protocol;
mod state;
mod timestamp;

pub use cell::{NativeCell, StateCell, NATIVE_CELL_BYTES};
pub use state::{LockState, SharedState, WireWidth};
pub use timestamp::Timestamp;
