//! Storage provider errors.

use std::io;

use thiserror::Error;

/// Why a provider could not hand out a segment.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The provider has no more memory to give.
    #[error("out of memory: no segment of {segment_size} bytes available")]
    OutOfMemory {
        /// Segment size that was requested.
        segment_size: usize,
    },

    /// A configured ceiling would be exceeded by one more segment.
    #[error("storage limit of {limit} bytes exceeded ({live} bytes live)")]
    LimitExceeded {
        /// Configured ceiling in bytes.
        limit: usize,
        /// Bytes live at the time of the request.
        live: usize,
    },

    /// The segment size is not a power of two or is smaller than a page.
    #[error("invalid segment size {0}: must be a power of two of at least one page")]
    InvalidSegmentSize(usize),

    /// The operating system refused the mapping.
    #[error("os error: {0}")]
    Os(#[from] io::Error),
}

impl StorageError {
    /// True for the conditions a heap reports as out-of-memory.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            StorageError::OutOfMemory { .. } | StorageError::LimitExceeded { .. }
        )
    }
}
