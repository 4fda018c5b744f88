//! Advisory page pinning.
//!
//! Some platforms let a process tell the kernel that a byte range is in use (pin) or may be
//! reclaimed (unpin). Pinning can also reveal that the kernel already reclaimed the range,
//! even though the logical lock was acquired cleanly.

/// Result of pinning a byte range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinStatus {
    /// The range is pinned and its contents survived.
    Intact,
    /// The range is pinned, but some or all of it was reclaimed while unpinned.
    Purged,
    /// The platform call failed.
    Failed,
}

/// Platform pin/unpin calls. Offsets are in bytes from the start of the region, header
/// included.
pub trait PinHook: Send + Sync {
    fn pin(&self, offset: usize, len: usize) -> PinStatus;

    /// Best effort; the return value is only reported.
    fn unpin(&self, offset: usize, len: usize) -> bool;
}

/// Hook for platforms without pinning: every pin succeeds with contents intact.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPin;

impl PinHook for NoPin {
    fn pin(&self, _offset: usize, _len: usize) -> PinStatus {
        PinStatus::Intact
    }

    fn unpin(&self, _offset: usize, _len: usize) -> bool {
        true
    }
}
