//! A byte ceiling in front of another provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{Storage, StorageError, StorageProvider};

/// Decorator that refuses segments once `limit` bytes are live.
///
/// The check happens before the delegate is consulted, so an embedder can
/// bound worst-case heap memory regardless of what the delegate could give.
pub struct LimitedStorageProvider {
    delegate: Arc<dyn StorageProvider>,
    limit: usize,
    live_bytes: AtomicUsize,
}

impl LimitedStorageProvider {
    /// Wraps `delegate` with a ceiling of `limit` bytes.
    pub fn new(delegate: Arc<dyn StorageProvider>, limit: usize) -> Self {
        LimitedStorageProvider {
            delegate,
            limit,
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Wraps `delegate` with a ceiling of `segments` segments.
    pub fn with_segment_limit(delegate: Arc<dyn StorageProvider>, segments: usize) -> Self {
        let limit = delegate.segment_size().saturating_mul(segments);
        Self::new(delegate, limit)
    }

    /// Configured ceiling in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently handed out.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }
}

impl StorageProvider for LimitedStorageProvider {
    fn segment_size(&self) -> usize {
        self.delegate.segment_size()
    }

    fn new_storage(&self, name: Option<&str>) -> Result<Storage, StorageError> {
        let size = self.segment_size();
        let reserved = self
            .live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_add(size).filter(|next| *next <= self.limit)
            });
        if let Err(live) = reserved {
            log::debug!(
                "storage limit reached: {} of {} bytes live",
                live,
                self.limit
            );
            return Err(StorageError::LimitExceeded {
                limit: self.limit,
                live,
            });
        }
        match self.delegate.new_storage(name) {
            Ok(storage) => Ok(storage),
            Err(err) => {
                self.live_bytes.fetch_sub(size, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    fn delete_storage(&self, storage: Storage) {
        let size = storage.size();
        self.delegate.delete_storage(storage);
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
    }

    fn provider_name(&self) -> &'static str {
        "limited"
    }
}
