//! Heap segment providers.
//!
//! A heap obtains its memory as fixed-size segments whose start address is
//! aligned to the segment size, so the segment owning any interior address
//! is found by masking. This crate defines the [`StorageProvider`] contract
//! and the providers a heap can be configured with:
//!
//! - [`MallocStorageProvider`] - the global allocator
//! - [`MmapStorageProvider`] - anonymous `mmap` (unix only)
//! - [`PreAllocatedStorageProvider`] - a fixed arena reserved up front
//! - [`LimitedStorageProvider`] - a byte ceiling over another provider
//! - [`CountingStorageProvider`] - allocation accounting for tests
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use storage_provider::{
//!     CountingStorageProvider, LimitedStorageProvider, MallocStorageProvider, StorageProvider,
//! };
//!
//! let malloc = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
//! let limited = Arc::new(LimitedStorageProvider::with_segment_limit(malloc, 1));
//! let counting = CountingStorageProvider::new(limited);
//!
//! let segment = counting.new_storage(Some("young")).unwrap();
//! assert_eq!(segment.addr() % (1 << 16), 0);
//! assert!(counting.new_storage(None).is_err());
//! counting.delete_storage(segment);
//! assert_eq!(counting.num_live(), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod counting;
mod error;
mod limited;
mod malloc;
#[cfg(unix)]
mod mmap;
mod preallocated;
mod storage;

use std::sync::Arc;

pub use counting::{CountingStorageProvider, StorageCounters};
pub use error::StorageError;
pub use limited::LimitedStorageProvider;
pub use malloc::MallocStorageProvider;
#[cfg(unix)]
pub use mmap::MmapStorageProvider;
pub use preallocated::PreAllocatedStorageProvider;
pub use storage::{
    validate_segment_size, Storage, StorageProvider, DEFAULT_SEGMENT_SIZE, MIN_SEGMENT_SIZE,
};

/// The provider a heap uses when none is configured: `mmap` on unix, the
/// global allocator elsewhere.
pub fn default_provider(segment_size: usize) -> Result<Arc<dyn StorageProvider>, StorageError> {
    #[cfg(unix)]
    {
        Ok(Arc::new(MmapStorageProvider::new(segment_size)?))
    }
    #[cfg(not(unix))]
    {
        Ok(Arc::new(MallocStorageProvider::new(segment_size)?))
    }
}
