//! Backing shared-memory regions.
//!
//! A region is a handle to memory that several processes (or several instances in one
//! process) can map at once. [`DiscardableRegion`](crate::DiscardableRegion) layers the
//! lock/purge protocol on top; the region itself knows nothing about it.

mod anon;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod memfd;

use std::ptr::NonNull;

use crate::Result;

pub use anon::AnonRegion;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use memfd::MemfdRegion;

/// A handle to shared memory plus at most one mapping of it.
///
/// The handle and the mapping have separate lifetimes: closing the handle leaves an
/// existing mapping usable, and unmapping leaves the handle open for a later
/// [`map`](SharedRegion::map) or [`share`](SharedRegion::share).
pub trait SharedRegion: Sized {
    /// Creates a fresh zero-filled region of exactly `size` bytes and maps all of it.
    fn create_and_map(size: usize) -> Result<Self>;

    /// Maps the first `size` bytes of the region. `0` maps the whole region.
    fn map(&mut self, size: usize) -> Result<()>;

    /// Returns `false` if nothing was mapped.
    fn unmap(&mut self) -> bool;

    /// Duplicates the handle for another process or instance. The duplicate starts
    /// unmapped.
    fn share(&self) -> Result<Self>;

    /// Closes the handle. Idempotent.
    fn close(&mut self);

    fn is_valid(&self) -> bool;

    fn is_mapped(&self) -> bool;

    /// Size of the underlying region as reported by the backend.
    fn region_size(&self) -> Result<usize>;

    /// Start of the mapping; page aligned.
    fn as_ptr(&self) -> Option<NonNull<u8>>;

    fn mapped_len(&self) -> usize;

    /// Tells the backend the contents of `offset..offset + len` are no longer needed.
    fn discard(&self, offset: usize, len: usize) -> Result<()>;

    /// Shrinks the underlying region to `len` bytes.
    ///
    /// The existing mapping is left in place but only its first `len` bytes stay
    /// addressable.
    fn shrink_to(&mut self, len: usize) -> Result<()>;
}

/// The region type used by default on this platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type DefaultRegion = MemfdRegion;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub type DefaultRegion = AnonRegion;
