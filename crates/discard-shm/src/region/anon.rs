use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use super::SharedRegion;
use crate::{page_size, Result, ShmError};

/// Page-aligned, zero-filled heap block. Freed when the last handle or mapping drops.
struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Block {
    fn alloc(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, page_size())
            .map_err(|e| ShmError::AllocationFailed(e.to_string()))?;
        // SAFETY: `layout` has a non-zero size (checked by the caller).
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| ShmError::AllocationFailed(format!("out of memory ({size} bytes)")))?;
        Ok(Self { ptr, layout })
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: allocated in `Block::alloc` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: the block is plain memory; access is coordinated through the shared state word.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

/// In-process stand-in for OS shared memory.
///
/// Every handle produced by [`share`](SharedRegion::share) refers to the same heap block,
/// so several instances in one process observe each other exactly as separate processes
/// would observe a real shared mapping. Discarding zero-fills the range to mimic the
/// kernel dropping the pages.
pub struct AnonRegion {
    handle: Option<Arc<Block>>,
    mapping: Option<(Arc<Block>, usize)>,
}

impl SharedRegion for AnonRegion {
    fn create_and_map(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ShmError::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        let block = Arc::new(Block::alloc(size)?);
        Ok(Self {
            handle: Some(block.clone()),
            mapping: Some((block, size)),
        })
    }

    fn map(&mut self, size: usize) -> Result<()> {
        if self.mapping.is_some() {
            return Err(ShmError::MappingFailed("already mapped".into()));
        }
        let block = self.handle.as_ref().ok_or(ShmError::Closed)?;
        let available = block.len();
        let len = if size == 0 { available } else { size };
        if len > available {
            return Err(ShmError::InvalidSize {
                size: len,
                available,
            });
        }
        self.mapping = Some((block.clone(), len));
        Ok(())
    }

    fn unmap(&mut self) -> bool {
        self.mapping.take().is_some()
    }

    fn share(&self) -> Result<Self> {
        let block = self.handle.as_ref().ok_or(ShmError::Closed)?;
        Ok(Self {
            handle: Some(block.clone()),
            mapping: None,
        })
    }

    fn close(&mut self) {
        self.handle = None;
    }

    fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    fn region_size(&self) -> Result<usize> {
        self.handle
            .as_ref()
            .map(|block| block.len())
            .ok_or(ShmError::Closed)
    }

    fn as_ptr(&self) -> Option<NonNull<u8>> {
        self.mapping.as_ref().map(|(block, _)| block.ptr)
    }

    fn mapped_len(&self) -> usize {
        self.mapping.as_ref().map_or(0, |(_, len)| *len)
    }

    fn discard(&self, offset: usize, len: usize) -> Result<()> {
        let (block, mapped) = self.mapping.as_ref().ok_or(ShmError::NotMapped)?;
        if offset.checked_add(len).map_or(true, |end| end > *mapped) {
            return Err(ShmError::InvalidSize {
                size: offset.saturating_add(len),
                available: *mapped,
            });
        }
        // SAFETY: in bounds of the block; the caller holds the purge, so no peer is using
        // the range.
        unsafe { block.ptr.as_ptr().add(offset).write_bytes(0, len) };
        Ok(())
    }

    fn shrink_to(&mut self, _len: usize) -> Result<()> {
        Err(ShmError::Unsupported("heap-backed regions cannot shrink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_page_aligned_and_zeroed() {
        let region = AnonRegion::create_and_map(3 * page_size()).unwrap();
        let ptr = region.as_ptr().unwrap();
        assert_eq!(ptr.as_ptr() as usize % page_size(), 0);
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), region.mapped_len()) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn mapping_outlives_closed_handle() {
        let mut region = AnonRegion::create_and_map(page_size()).unwrap();
        let mut peer = region.share().unwrap();
        region.close();
        assert!(region.is_mapped());
        assert!(matches!(region.map(0), Err(ShmError::MappingFailed(_))));

        peer.map(0).unwrap();
        assert_eq!(peer.as_ptr(), region.as_ptr());
    }

    #[test]
    fn unmap_and_close_are_idempotent() {
        let mut region = AnonRegion::create_and_map(page_size()).unwrap();
        assert!(region.unmap());
        assert!(!region.unmap());
        region.close();
        region.close();
        assert!(matches!(region.map(0), Err(ShmError::Closed)));
    }
}
