//! Segments mapped directly from the operating system.

use std::io;
use std::ptr::{self, NonNull};

use crate::{validate_segment_size, Storage, StorageError, StorageProvider};

/// Provider that maps anonymous memory with `mmap`.
///
/// Alignment is obtained by reserving twice the segment size and unmapping
/// the unaligned head and tail of the reservation.
#[derive(Debug)]
pub struct MmapStorageProvider {
    segment_size: usize,
}

impl MmapStorageProvider {
    /// Creates a provider for segments of `segment_size` bytes.
    ///
    /// The size must also be a multiple of the system page size.
    pub fn new(segment_size: usize) -> Result<Self, StorageError> {
        validate_segment_size(segment_size)?;
        if segment_size % page_size() != 0 {
            return Err(StorageError::InvalidSegmentSize(segment_size));
        }
        Ok(MmapStorageProvider { segment_size })
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Unmaps `len` bytes at `addr`.
///
/// # Safety
///
/// The range must be a mapping (or part of one) this module created and
/// that nothing references anymore.
unsafe fn unmap(addr: usize, len: usize) {
    if len == 0 {
        return;
    }
    // SAFETY: guaranteed by the caller.
    if unsafe { libc::munmap(addr as *mut libc::c_void, len) } != 0 {
        let err = io::Error::last_os_error();
        log::error!("munmap({:#x}, {}) failed: {}", addr, len, err);
        panic!("munmap failed: {err}");
    }
}

impl StorageProvider for MmapStorageProvider {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn new_storage(&self, name: Option<&str>) -> Result<Storage, StorageError> {
        let size = self.segment_size;
        let reserve = size * 2;
        // SAFETY: an anonymous private mapping with no address hint.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                reserve,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOMEM) => StorageError::OutOfMemory { segment_size: size },
                _ => StorageError::Os(err),
            });
        }

        let start = raw as usize;
        let aligned = (start + size - 1) & !(size - 1);
        let head = aligned - start;
        let tail = reserve - head - size;
        // SAFETY: head and tail lie inside the reservation and are outside
        // the aligned segment we keep.
        unsafe {
            unmap(start, head);
            unmap(aligned + size, tail);
        }

        log::trace!(
            "mmap segment {:#x} ({})",
            aligned,
            name.unwrap_or("unnamed")
        );
        let ptr = NonNull::new(aligned as *mut u8).ok_or(StorageError::OutOfMemory {
            segment_size: size,
        })?;
        // SAFETY: a fresh anonymous mapping is zeroed, `size` bytes long and
        // aligned to `size`.
        Ok(unsafe { Storage::from_raw(ptr, size) })
    }

    fn delete_storage(&self, storage: Storage) {
        assert_eq!(
            storage.size(),
            self.segment_size,
            "segment returned to the wrong provider"
        );
        let (ptr, size) = storage.into_raw();
        log::trace!("munmap segment {:p}", ptr);
        // SAFETY: the segment was mapped by this provider and its handle has
        // been consumed.
        unsafe { unmap(ptr.as_ptr() as usize, size) };
    }

    fn provider_name(&self) -> &'static str {
        "mmap"
    }
}
