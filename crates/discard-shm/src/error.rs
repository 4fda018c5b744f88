use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors from creating, mapping or resizing a shared region.
///
/// Lock contention is not an error: [`DiscardableRegion::lock`](crate::DiscardableRegion::lock)
/// reports it as [`LockResult::Failed`](crate::LockResult::Failed) and
/// [`DiscardableRegion::purge`](crate::DiscardableRegion::purge) as `false`.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("requested size {size} overflows once rounded to pages and a header is added")]
    SizeOverflow { size: usize },

    #[error("failed to allocate shared memory: {0}")]
    AllocationFailed(String),

    #[error("failed to map shared memory: {0}")]
    MappingFailed(String),

    #[error("requested {size} bytes but the region only holds {available}")]
    InvalidSize { size: usize, available: usize },

    #[error("region is not mapped")]
    NotMapped,

    #[error("shared memory handle is closed")]
    Closed,

    #[error("unsupported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
