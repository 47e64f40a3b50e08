//! Segments from the global allocator.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::{validate_segment_size, Storage, StorageError, StorageProvider};

/// Provider backed by [`std::alloc::alloc_zeroed`] with an alignment equal
/// to the segment size.
#[derive(Debug)]
pub struct MallocStorageProvider {
    layout: Layout,
}

impl MallocStorageProvider {
    /// Creates a provider for segments of `segment_size` bytes.
    pub fn new(segment_size: usize) -> Result<Self, StorageError> {
        validate_segment_size(segment_size)?;
        let layout = Layout::from_size_align(segment_size, segment_size)
            .map_err(|_| StorageError::InvalidSegmentSize(segment_size))?;
        Ok(MallocStorageProvider { layout })
    }
}

impl StorageProvider for MallocStorageProvider {
    fn segment_size(&self) -> usize {
        self.layout.size()
    }

    fn new_storage(&self, name: Option<&str>) -> Result<Storage, StorageError> {
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(self.layout) };
        let ptr = NonNull::new(raw).ok_or(StorageError::OutOfMemory {
            segment_size: self.layout.size(),
        })?;
        log::trace!(
            "malloc segment {:p} ({})",
            raw,
            name.unwrap_or("unnamed")
        );
        // SAFETY: freshly allocated with size and alignment equal to the
        // segment size, owned by nobody else.
        Ok(unsafe { Storage::from_raw(ptr, self.layout.size()) })
    }

    fn delete_storage(&self, storage: Storage) {
        assert_eq!(
            storage.size(),
            self.layout.size(),
            "segment returned to the wrong provider"
        );
        let (ptr, _) = storage.into_raw();
        log::trace!("free segment {:p}", ptr);
        // SAFETY: the storage was allocated by this provider with this layout.
        unsafe { alloc::dealloc(ptr.as_ptr(), self.layout) };
    }

    fn provider_name(&self) -> &'static str {
        "malloc"
    }
}
