//! Region backed by Linux memfd (anonymous shared memory).
//!
//! The fd can be duplicated and passed to another process via `SCM_RIGHTS`; the kernel
//! frees the memory once the last fd and mapping are gone.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::ptr::NonNull;

use rustix::fs::MemfdFlags;
use rustix::mm::{Advice, MapFlags, ProtFlags};
use tracing::debug;

use super::SharedRegion;
use crate::{Result, ShmError};

const MEMFD_NAME: &str = "discardable";

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

pub struct MemfdRegion {
    fd: Option<OwnedFd>,
    mapping: Option<Mapping>,
}

impl MemfdRegion {
    /// Wraps an fd received from another process. The region starts unmapped.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            fd: Some(fd),
            mapping: None,
        }
    }

    /// The memfd, or `None` once closed.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    fn mmap(fd: &OwnedFd, len: usize) -> rustix::io::Result<NonNull<u8>> {
        // SAFETY: a fresh shared mapping chosen by the kernel; no existing memory is aliased.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )?
        };
        NonNull::new(ptr.cast::<u8>()).ok_or(rustix::io::Errno::NOMEM)
    }
}

impl SharedRegion for MemfdRegion {
    fn create_and_map(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ShmError::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let fd = rustix::fs::memfd_create(MEMFD_NAME, MemfdFlags::CLOEXEC)
            .map_err(|e| ShmError::AllocationFailed(format!("memfd_create: {e}")))?;
        rustix::fs::ftruncate(&fd, size as u64)
            .map_err(|e| ShmError::AllocationFailed(format!("ftruncate({size}): {e}")))?;
        let ptr = Self::mmap(&fd, size)
            .map_err(|e| ShmError::AllocationFailed(format!("mmap({size}): {e}")))?;

        Ok(Self {
            fd: Some(fd),
            mapping: Some(Mapping { ptr, len: size }),
        })
    }

    fn map(&mut self, size: usize) -> Result<()> {
        if self.mapping.is_some() {
            return Err(ShmError::MappingFailed("already mapped".into()));
        }
        let available = self.region_size()?;
        let len = if size == 0 { available } else { size };
        if len == 0 || len > available {
            return Err(ShmError::InvalidSize {
                size: len,
                available,
            });
        }

        let fd = self.fd.as_ref().ok_or(ShmError::Closed)?;
        let ptr = Self::mmap(fd, len)
            .map_err(|e| ShmError::MappingFailed(format!("mmap({len}): {e}")))?;
        self.mapping = Some(Mapping { ptr, len });
        Ok(())
    }

    fn unmap(&mut self) -> bool {
        let Some(mapping) = self.mapping.take() else {
            return false;
        };
        // SAFETY: `mapping` came from our own mmap call and is dropped here.
        if let Err(e) = unsafe { rustix::mm::munmap(mapping.ptr.as_ptr().cast(), mapping.len) } {
            debug!("munmap failed: {e}");
        }
        true
    }

    fn share(&self) -> Result<Self> {
        let fd = self.fd.as_ref().ok_or(ShmError::Closed)?;
        Ok(Self::from_fd(fd.try_clone()?))
    }

    fn close(&mut self) {
        self.fd = None;
    }

    fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    fn region_size(&self) -> Result<usize> {
        let fd = self.fd.as_ref().ok_or(ShmError::Closed)?;
        let stat = rustix::fs::fstat(fd).map_err(std::io::Error::from)?;
        usize::try_from(stat.st_size)
            .map_err(|_| ShmError::MappingFailed(format!("bogus memfd size {}", stat.st_size)))
    }

    fn as_ptr(&self) -> Option<NonNull<u8>> {
        self.mapping.as_ref().map(|m| m.ptr)
    }

    fn mapped_len(&self) -> usize {
        self.mapping.as_ref().map_or(0, |m| m.len)
    }

    fn discard(&self, offset: usize, len: usize) -> Result<()> {
        let mapping = self.mapping.as_ref().ok_or(ShmError::NotMapped)?;
        if offset.checked_add(len).map_or(true, |end| end > mapping.len) {
            return Err(ShmError::InvalidSize {
                size: offset.saturating_add(len),
                available: mapping.len,
            });
        }
        if len == 0 {
            return Ok(());
        }
        // SAFETY: the range lies inside our mapping. MADV_REMOVE frees the backing pages;
        // later reads observe zeroes.
        unsafe {
            rustix::mm::madvise(
                mapping.ptr.as_ptr().add(offset).cast(),
                len,
                Advice::LinuxRemove,
            )
        }
        .map_err(std::io::Error::from)?;
        Ok(())
    }

    fn shrink_to(&mut self, len: usize) -> Result<()> {
        let fd = self.fd.as_ref().ok_or(ShmError::Closed)?;
        rustix::fs::ftruncate(fd, len as u64).map_err(std::io::Error::from)?;
        Ok(())
    }
}

impl Drop for MemfdRegion {
    fn drop(&mut self) {
        self.unmap();
        // fd is closed when OwnedFd is dropped
    }
}

// SAFETY: the mapping is shared memory owned by this value; nothing is thread-local.
unsafe impl Send for MemfdRegion {}
unsafe impl Sync for MemfdRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_fails() {
        assert!(matches!(
            MemfdRegion::create_and_map(0),
            Err(ShmError::AllocationFailed(_))
        ));
    }

    #[test]
    fn shared_handle_sees_same_bytes() {
        let page = crate::page_size();
        let mut a = MemfdRegion::create_and_map(2 * page).unwrap();
        let mut b = a.share().unwrap();
        assert!(!b.is_mapped());
        b.map(0).unwrap();
        assert_eq!(b.mapped_len(), 2 * page);

        let pa = a.as_ptr().unwrap().as_ptr();
        let pb = b.as_ptr().unwrap().as_ptr();
        unsafe {
            pa.add(page).write(0xAB);
            assert_eq!(pb.add(page).read(), 0xAB);
        }

        assert!(a.unmap());
        assert!(!a.unmap());
    }

    #[test]
    fn discard_zeroes_contents() {
        let page = crate::page_size();
        let region = MemfdRegion::create_and_map(2 * page).unwrap();
        let ptr = region.as_ptr().unwrap().as_ptr();
        unsafe { ptr.add(page).write(7) };
        region.discard(page, page).unwrap();
        assert_eq!(unsafe { ptr.add(page).read() }, 0);
    }

    #[test]
    fn map_rejects_sizes_past_the_end() {
        let page = crate::page_size();
        let a = MemfdRegion::create_and_map(page).unwrap();
        let mut b = a.share().unwrap();
        assert!(matches!(
            b.map(2 * page),
            Err(ShmError::InvalidSize { .. })
        ));
    }

    #[test]
    fn closed_handle_cannot_share_but_mapping_survives() {
        let page = crate::page_size();
        let mut region = MemfdRegion::create_and_map(page).unwrap();
        region.close();
        region.close();
        assert!(!region.is_valid());
        assert!(region.is_mapped());
        assert!(matches!(region.share(), Err(ShmError::Closed)));
    }
}
