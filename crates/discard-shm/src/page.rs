//! Page-size arithmetic for region layout.

use discard_shared::NATIVE_CELL_BYTES;

use crate::{Result, ShmError};

#[cfg(unix)]
pub fn page_size() -> usize {
    rustix::param::page_size()
}

#[cfg(not(unix))]
pub fn page_size() -> usize {
    4096
}

pub(crate) const fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

pub fn align_to_page_size(value: usize) -> Option<usize> {
    align_up(value, page_size())
}

/// Bytes reserved ahead of the payload for the shared state word.
pub fn header_size() -> usize {
    // A single word is always smaller than a page.
    align_up(NATIVE_CELL_BYTES, page_size()).unwrap_or(NATIVE_CELL_BYTES)
}

/// Total region size for a payload of `size` bytes: header plus payload, rounded to pages.
pub fn region_size_for(size: usize) -> Result<usize> {
    align_to_page_size(size)
        .and_then(|payload| payload.checked_add(header_size()))
        .ok_or(ShmError::SizeOverflow { size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fills_exactly_one_page() {
        assert_eq!(header_size(), page_size());
    }

    #[test]
    fn region_size_rounds_payload_up() {
        let page = page_size();
        assert_eq!(region_size_for(0).unwrap(), page);
        assert_eq!(region_size_for(1).unwrap(), 2 * page);
        assert_eq!(region_size_for(page).unwrap(), 2 * page);
        assert_eq!(region_size_for(page + 1).unwrap(), 3 * page);
    }

    #[test]
    fn oversized_requests_overflow() {
        assert!(matches!(
            region_size_for(usize::MAX),
            Err(ShmError::SizeOverflow { size: usize::MAX })
        ));
        assert!(matches!(
            region_size_for(usize::MAX - page_size() + 1),
            Err(ShmError::SizeOverflow { .. })
        ));
    }
}
