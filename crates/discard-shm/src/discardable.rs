use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

use discard_shared::{protocol, NativeCell, SharedState, Timestamp};
use tracing::{debug, trace};

use crate::page::{header_size, page_size, region_size_for};
use crate::{
    Clock, DefaultRegion, NoPin, PageLockSet, PinHook, PinStatus, Result, SharedRegion,
    ShmError, SystemClock,
};

/// Outcome of [`DiscardableRegion::lock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockResult {
    /// Locked with contents intact.
    Success,
    /// Locked, but the contents were discarded and must be rebuilt.
    Purged,
    /// Not locked: a peer holds the region, it was purged, or our view was stale.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscardableOptions {
    /// Track exactly which pages are locked and panic on double lock/unlock.
    pub validate_pages: bool,
}

impl Default for DiscardableOptions {
    fn default() -> Self {
        Self {
            validate_pages: cfg!(debug_assertions),
        }
    }
}

/// One instance's view of a shared memory region whose contents may be discarded while
/// no instance has it locked.
///
/// The region starts with a header page holding the shared state word, followed by the
/// payload returned from [`memory`](Self::memory). Lock state is tracked twice:
/// - globally, in the shared word, as a single logical lock;
/// - locally, as a count of locked pages. The logical lock is taken when the count leaves
///   zero and released when it returns to zero.
///
/// Mutating operations take `&mut self`; an instance shared between threads needs external
/// locking. Separate instances, in this process or others, coordinate only through the
/// shared word.
///
/// Dropping an instance unmaps it without touching the shared word.
pub struct DiscardableRegion<R: SharedRegion = DefaultRegion> {
    region: R,
    mapped_size: usize,
    locked_page_count: usize,
    last_known_usage: Timestamp,
    locked_pages: PageLockSet,
    clock: Arc<dyn Clock>,
    pin: Arc<dyn PinHook>,
}

/// The state word at the start of `region`'s mapping.
fn state_cell<R: SharedRegion>(region: &R) -> Option<&NativeCell> {
    let ptr = region.as_ptr()?;
    debug_assert!(region.mapped_len() >= header_size());
    // SAFETY: mappings are page aligned and at least one header page long, and the word is
    // only ever accessed atomically. The borrow of `region` keeps the mapping alive.
    Some(unsafe { &*ptr.as_ptr().cast::<NativeCell>() })
}

impl<R: SharedRegion> DiscardableRegion<R> {
    /// Creates a new region with at least `size` payload bytes, mapped and locked.
    pub fn create_and_map(size: usize) -> Result<Self> {
        Self::create_and_map_with(size, DiscardableOptions::default())
    }

    pub fn create_and_map_with(size: usize, options: DiscardableOptions) -> Result<Self> {
        let total = region_size_for(size)?;
        let region = R::create_and_map(total).map_err(|e| {
            debug!(size, total, "failed to create discardable region: {e}");
            e
        })?;

        let mut this = Self::from_region_with(region, options);
        this.attach_mapping();
        if let Some(cell) = state_cell(&this.region) {
            protocol::initialize_locked(cell);
        }
        debug!(size, mapped_size = this.mapped_size, "created discardable region");
        Ok(this)
    }

    /// Wraps an existing handle, typically one received from another process. Call
    /// [`map`](Self::map) before use.
    pub fn from_region(region: R) -> Self {
        Self::from_region_with(region, DiscardableOptions::default())
    }

    pub fn from_region_with(region: R, options: DiscardableOptions) -> Self {
        Self {
            region,
            mapped_size: 0,
            locked_page_count: 0,
            last_known_usage: Timestamp::NULL,
            locked_pages: PageLockSet::new(options.validate_pages),
            clock: Arc::new(SystemClock),
            pin: Arc::new(NoPin),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pin_hook(mut self, pin: Arc<dyn PinHook>) -> Self {
        self.pin = pin;
        self
    }

    /// Maps `size` payload bytes of the handle; `0` maps the whole region.
    ///
    /// The whole mapping is treated as locked by this instance, whatever the shared word
    /// says, so an explicit [`unlock`](Self::unlock) must precede any purge this instance
    /// can win.
    pub fn map(&mut self, size: usize) -> Result<()> {
        let len = if size == 0 { 0 } else { region_size_for(size)? };
        self.region.map(len).map_err(|e| {
            debug!(size, "failed to map discardable region: {e}");
            e
        })?;

        let mapped = self.region.mapped_len();
        if mapped < header_size() {
            self.region.unmap();
            return Err(ShmError::InvalidSize {
                size: header_size(),
                available: mapped,
            });
        }

        self.attach_mapping();
        debug!(mapped_size = self.mapped_size, "mapped discardable region");
        Ok(())
    }

    fn attach_mapping(&mut self) {
        self.mapped_size = self.region.mapped_len().saturating_sub(header_size());
        let pages = self.mapped_size / page_size();
        self.locked_page_count = pages;
        self.locked_pages.clear();
        self.locked_pages.lock(0..pages);
    }

    /// Returns `false` if nothing was mapped.
    pub fn unmap(&mut self) -> bool {
        if !self.region.unmap() {
            return false;
        }
        self.mapped_size = 0;
        self.locked_page_count = 0;
        self.locked_pages.clear();
        debug!("unmapped discardable region");
        true
    }

    /// Closes the handle. An existing mapping stays usable.
    pub fn close(&mut self) {
        if self.region.is_valid() {
            self.region.close();
            debug!("closed discardable region handle");
        }
    }

    pub fn handle(&self) -> &R {
        &self.region
    }

    /// Duplicates the handle for another process or instance.
    pub fn share(&self) -> Result<R> {
        self.region.share()
    }

    pub fn is_mapped(&self) -> bool {
        self.region.is_mapped()
    }

    /// Payload bytes, excluding the header.
    pub fn mapped_size(&self) -> usize {
        self.mapped_size
    }

    pub fn locked_page_count(&self) -> usize {
        self.locked_page_count
    }

    /// The unlock time this instance last observed, or null when it believes the region
    /// is locked or purged.
    pub fn last_known_usage(&self) -> Timestamp {
        self.last_known_usage
    }

    /// Start of the payload. Only meaningful while this instance holds a lock.
    pub fn as_ptr(&self) -> Option<NonNull<u8>> {
        let base = self.region.as_ptr()?;
        // SAFETY: the header lies inside the mapping.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(header_size())) })
    }

    /// The payload, empty when unmapped.
    ///
    /// # Safety
    ///
    /// Other instances share these bytes. While the returned slice is alive:
    /// - this instance must hold a lock on the pages being read, so no peer writes them or
    ///   purges the region;
    /// - no instance may [`shrink`](Self::shrink) the region, since touching truncated
    ///   pages faults.
    pub unsafe fn memory(&self) -> &[u8] {
        match self.as_ptr() {
            // SAFETY: `mapped_size` bytes follow the header inside the mapping; the caller
            // excludes concurrent writers and truncation.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.mapped_size) },
            None => &[],
        }
    }

    /// Mutable payload, empty when unmapped.
    ///
    /// # Safety
    ///
    /// Same contract as [`memory`](Self::memory). Holding the lock also keeps peers from
    /// reading the pages while they are written.
    pub unsafe fn memory_mut(&mut self) -> &mut [u8] {
        match self.as_ptr() {
            // SAFETY: as in `memory`, and `&mut self` excludes other views from this instance.
            Some(ptr) => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), self.mapped_size)
            },
            None => &mut [],
        }
    }

    /// Page indices covered by `offset..offset + length`; `length == 0` runs to the end.
    ///
    /// # Panics
    ///
    /// Panics if the range is not page aligned or extends past the payload.
    fn page_range(&self, offset: usize, length: usize) -> Range<usize> {
        let page = page_size();
        assert_eq!(offset % page, 0, "offset {offset} is not page aligned");
        assert_eq!(length % page, 0, "length {length} is not page aligned");
        assert!(
            offset <= self.mapped_size,
            "offset {offset} is past the end of a {} byte payload",
            self.mapped_size
        );
        let length = if length == 0 {
            self.mapped_size - offset
        } else {
            length
        };
        assert!(
            length <= self.mapped_size - offset,
            "range {offset}+{length} is past the end of a {} byte payload",
            self.mapped_size
        );
        offset / page..(offset + length) / page
    }

    /// Locks a page range, taking the logical lock first if this instance holds none.
    ///
    /// `offset` and `length` must be page aligned and the range must not already be
    /// locked by this instance; `length == 0` locks through the end. Empty ranges and
    /// unmapped regions fail without checking the range.
    pub fn lock(&mut self, offset: usize, length: usize) -> LockResult {
        let Some(cell) = state_cell(&self.region) else {
            return LockResult::Failed;
        };
        let pages = self.page_range(offset, length);
        if pages.is_empty() {
            return LockResult::Failed;
        }

        let acquiring = self.locked_page_count == 0;
        if acquiring && !protocol::try_acquire(cell, &mut self.last_known_usage) {
            trace!(
                last_known_usage = self.last_known_usage.as_micros(),
                "logical lock not acquired"
            );
            return LockResult::Failed;
        }

        self.locked_pages.lock(pages.clone());
        self.locked_page_count += pages.len();
        debug_assert!(self.locked_page_count <= self.mapped_size / page_size());

        let page = page_size();
        let byte_offset = header_size() + pages.start * page;
        let byte_len = pages.len() * page;
        match self.pin.pin(byte_offset, byte_len) {
            PinStatus::Intact => LockResult::Success,
            // Any reclaimed page taints the whole requested range.
            PinStatus::Purged => {
                trace!(byte_offset, byte_len, "locked range was already reclaimed");
                LockResult::Purged
            }
            PinStatus::Failed => {
                self.locked_pages.unlock(pages.clone());
                self.locked_page_count -= pages.len();
                if acquiring {
                    // Restore the word exactly as we found it.
                    protocol::release(cell, self.last_known_usage);
                }
                debug!(byte_offset, byte_len, "pinning failed; lock rolled back");
                LockResult::Failed
            }
        }
    }

    /// Unlocks a page range, releasing the logical lock once no pages remain locked.
    ///
    /// Same range conventions as [`lock`](Self::lock); the range must currently be locked
    /// by this instance.
    pub fn unlock(&mut self, offset: usize, length: usize) {
        let Some(cell) = state_cell(&self.region) else {
            debug_assert!(false, "unlock of an unmapped region");
            return;
        };
        let pages = self.page_range(offset, length);
        if pages.is_empty() {
            return;
        }
        assert!(
            pages.len() <= self.locked_page_count,
            "unlocking {} pages but only {} are locked",
            pages.len(),
            self.locked_page_count
        );

        let page = page_size();
        let byte_offset = header_size() + pages.start * page;
        let byte_len = pages.len() * page;
        if !self.pin.unpin(byte_offset, byte_len) {
            trace!(byte_offset, byte_len, "unpin failed");
        }

        self.locked_pages.unlock(pages.clone());
        self.locked_page_count -= pages.len();
        if self.locked_page_count > 0 {
            return;
        }

        // A null time would publish the purged sentinel.
        let now = self.clock.now().max(Timestamp::from_micros(1));
        protocol::release(cell, now);
        self.last_known_usage = now;
        trace!(now = now.as_micros(), "released logical lock");
    }

    /// Tries to purge the whole region on behalf of any process.
    ///
    /// Succeeds only if the shared word still says "unlocked at `last_known_usage`". On
    /// failure `last_known_usage` is refreshed, so calling again may succeed. An unmapped
    /// region has nothing to purge and reports success.
    pub fn purge(&mut self, current_time: Timestamp) -> bool {
        let Some(cell) = state_cell(&self.region) else {
            return true;
        };

        if !protocol::try_purge(cell, &mut self.last_known_usage, current_time) {
            trace!(
                last_known_usage = self.last_known_usage.as_micros(),
                "purge lost to a newer state"
            );
            return false;
        }

        if self.mapped_size > 0 {
            if let Err(e) = self.region.discard(header_size(), self.mapped_size) {
                debug!("failed to release purged pages: {e}");
            }
        }
        trace!("purged discardable region");
        true
    }

    /// `false` only once the region has been purged. Advisory snapshot.
    pub fn is_memory_resident(&self) -> bool {
        state_cell(&self.region).is_some_and(|cell| protocol::snapshot(cell).is_resident())
    }

    /// Whether some instance holds the logical lock. Advisory snapshot.
    pub fn is_memory_locked(&self) -> bool {
        state_cell(&self.region)
            .is_some_and(|cell| protocol::snapshot(cell) == SharedState::Locked)
    }

    /// Gives the payload back to the system by truncating the region to its header.
    ///
    /// Meant for purged regions; afterwards the payload is empty.
    pub fn shrink(&mut self) -> Result<()> {
        if !self.region.is_mapped() {
            return Err(ShmError::NotMapped);
        }
        self.region.shrink_to(header_size())?;
        self.mapped_size = 0;
        self.locked_page_count = 0;
        self.locked_pages.clear();
        debug!("shrunk discardable region");
        Ok(())
    }
}

impl<R: SharedRegion> fmt::Debug for DiscardableRegion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscardableRegion")
            .field("mapped_size", &self.mapped_size)
            .field("locked_page_count", &self.locked_page_count)
            .field("last_known_usage", &self.last_known_usage)
            .field("validate_pages", &self.locked_pages.is_enabled())
            .finish_non_exhaustive()
    }
}
