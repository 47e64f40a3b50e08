//! A fixed arena of segments reserved up front.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use parking_lot::Mutex;

use crate::{validate_segment_size, Storage, StorageError, StorageProvider};

#[derive(Debug)]
struct ArenaState {
    /// Indices of segments returned by the heap.
    free: Vec<usize>,
    /// Next never-used segment index.
    next: usize,
}

/// Provider carving segments out of one pre-reserved arena.
///
/// The arena holds `capacity` segments. Returned segments are recycled and
/// re-zeroed before being handed out again; once every slot is in use the
/// provider reports out-of-memory.
#[derive(Debug)]
pub struct PreAllocatedStorageProvider {
    base: NonNull<u8>,
    arena_layout: Layout,
    segment_size: usize,
    capacity: usize,
    state: Mutex<ArenaState>,
}

// SAFETY: the arena pointer is only dereferenced through segments handed out
// under the state lock; the provider itself never reads the arena.
unsafe impl Send for PreAllocatedStorageProvider {}
// SAFETY: see above; all mutable state is behind the mutex.
unsafe impl Sync for PreAllocatedStorageProvider {}

impl PreAllocatedStorageProvider {
    /// Reserves an arena of `capacity` segments of `segment_size` bytes.
    pub fn new(segment_size: usize, capacity: usize) -> Result<Self, StorageError> {
        validate_segment_size(segment_size)?;
        let total = segment_size
            .checked_mul(capacity.max(1))
            .ok_or(StorageError::OutOfMemory { segment_size })?;
        let arena_layout = Layout::from_size_align(total, segment_size)
            .map_err(|_| StorageError::InvalidSegmentSize(segment_size))?;
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(arena_layout) };
        let base = NonNull::new(raw).ok_or(StorageError::OutOfMemory { segment_size })?;
        log::debug!(
            "pre-allocated arena of {} segments at {:p}",
            capacity,
            raw
        );
        Ok(PreAllocatedStorageProvider {
            base,
            arena_layout,
            segment_size,
            capacity,
            state: Mutex::new(ArenaState {
                free: Vec::new(),
                next: 0,
            }),
        })
    }

    /// Number of segments the arena can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of segments currently handed out.
    pub fn in_use(&self) -> usize {
        let state = self.state.lock();
        state.next - state.free.len()
    }

    fn segment_ptr(&self, index: usize) -> *mut u8 {
        // SAFETY: callers pass an index below `capacity`, so the offset stays
        // inside the arena allocation.
        unsafe { self.base.as_ptr().add(index * self.segment_size) }
    }
}

impl StorageProvider for PreAllocatedStorageProvider {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn new_storage(&self, name: Option<&str>) -> Result<Storage, StorageError> {
        let mut state = self.state.lock();
        let (index, recycled) = match state.free.pop() {
            Some(index) => (index, true),
            None if state.next < self.capacity => {
                state.next += 1;
                (state.next - 1, false)
            }
            None => {
                return Err(StorageError::OutOfMemory {
                    segment_size: self.segment_size,
                })
            }
        };
        drop(state);

        let raw = self.segment_ptr(index);
        if recycled {
            // SAFETY: the slot was returned to us and is owned by nobody.
            unsafe { ptr::write_bytes(raw, 0, self.segment_size) };
        }
        log::trace!(
            "arena segment {} at {:p} ({})",
            index,
            raw,
            name.unwrap_or("unnamed")
        );
        let ptr = NonNull::new(raw).ok_or(StorageError::OutOfMemory {
            segment_size: self.segment_size,
        })?;
        // SAFETY: the slot lies in the arena, is aligned to the segment size
        // because the arena is, and is exclusively owned until deleted.
        Ok(unsafe { Storage::from_raw(ptr, self.segment_size) })
    }

    fn delete_storage(&self, storage: Storage) {
        let base = self.base.as_ptr() as usize;
        let offset = storage.addr().wrapping_sub(base);
        assert!(
            storage.size() == self.segment_size && offset < self.arena_layout.size(),
            "segment returned to the wrong provider"
        );
        let index = offset / self.segment_size;
        let _ = storage.into_raw();
        log::trace!("arena segment {} returned", index);
        let mut state = self.state.lock();
        debug_assert!(!state.free.contains(&index), "segment deleted twice");
        state.free.push(index);
    }

    fn provider_name(&self) -> &'static str {
        "pre-allocated"
    }
}

impl Drop for PreAllocatedStorageProvider {
    fn drop(&mut self) {
        let in_use = self.in_use();
        if in_use != 0 {
            log::warn!("pre-allocated arena dropped with {} live segments", in_use);
        }
        // SAFETY: allocated in `new` with this layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.arena_layout) };
    }
}
