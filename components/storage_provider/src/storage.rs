//! The segment handle and the provider trait.

use std::fmt;
use std::ptr::NonNull;

use crate::StorageError;

/// Smallest segment size any provider accepts.
pub const MIN_SEGMENT_SIZE: usize = 4096;

/// Default segment size used by heaps that do not configure one.
pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 22;

/// An owned, segment-aligned block of memory.
///
/// A `Storage` is produced by exactly one [`StorageProvider`] and must be
/// returned to that provider through [`StorageProvider::delete_storage`],
/// which consumes it. The handle is deliberately neither `Clone` nor `Copy`,
/// so a segment cannot be deleted twice from safe code. Dropping a `Storage`
/// without deleting it leaks the segment.
#[must_use = "a segment must be returned with delete_storage"]
pub struct Storage {
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: a Storage is a unique owner of its memory range; nothing else holds
// a pointer into it until the heap carves cells out of it.
unsafe impl Send for Storage {}

impl Storage {
    /// Wraps a raw block.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes, aligned to
    /// `size`, and exclusively owned by the new handle until it is given back
    /// to the provider that created it.
    pub unsafe fn from_raw(ptr: NonNull<u8>, size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        debug_assert_eq!(ptr.as_ptr() as usize & (size - 1), 0);
        Storage { ptr, size }
    }

    /// Consumes the handle, returning the raw block.
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.size)
    }

    /// Start of the block.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Start of the block as an address.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Size of the block in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the last byte of the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.addr() + self.size
    }

    /// Whether `addr` lies inside the block.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr() && addr < self.end()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("size", &self.size)
            .finish()
    }
}

/// Source of heap segments.
///
/// Every segment has the provider's fixed [`segment_size`], is aligned to
/// it, and is zeroed when handed out. Segments are released whole; there
/// are no partial frees.
///
/// [`segment_size`]: StorageProvider::segment_size
pub trait StorageProvider: Send + Sync {
    /// Size and alignment of every segment this provider returns.
    fn segment_size(&self) -> usize;

    /// Returns a fresh zeroed segment.
    ///
    /// # Arguments
    ///
    /// * `name` - Optional tag used in diagnostics
    ///
    /// # Returns
    ///
    /// The segment, or the reason none could be provided.
    fn new_storage(&self, name: Option<&str>) -> Result<Storage, StorageError>;

    /// Releases a segment previously returned by [`new_storage`] on this
    /// provider.
    ///
    /// [`new_storage`]: StorageProvider::new_storage
    fn delete_storage(&self, storage: Storage);

    /// Short provider name for logs.
    fn provider_name(&self) -> &'static str;
}

/// Checks that `segment_size` is a power of two of at least
/// [`MIN_SEGMENT_SIZE`] bytes.
pub fn validate_segment_size(segment_size: usize) -> Result<(), StorageError> {
    if segment_size.is_power_of_two() && segment_size >= MIN_SEGMENT_SIZE {
        Ok(())
    } else {
        Err(StorageError::InvalidSegmentSize(segment_size))
    }
}
