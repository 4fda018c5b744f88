//! Discardable shared memory: regions that several processes share and that any of them may
//! purge once nobody has them locked.
//!
//! This crate re-exports the pieces most callers need. The lock-free word protocol lives in
//! `discard-shared`; regions, backends and the controller live in `discard-shm`.

pub use discard_shared::{protocol, LockState, SharedState, StateCell, Timestamp, WireWidth};
pub use discard_shm::*;
