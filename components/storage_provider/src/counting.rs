//! Segment traffic accounting in front of another provider.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Storage, StorageError, StorageProvider};

/// Snapshot of a [`CountingStorageProvider`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCounters {
    /// Successful `new_storage` calls.
    pub num_allocated: usize,
    /// `delete_storage` calls.
    pub num_deleted: usize,
    /// Failed `new_storage` calls.
    pub num_failed: usize,
    /// Segments currently live. Always `num_allocated - num_deleted`.
    pub num_live: usize,
    /// Highest `num_live` observed.
    pub max_live: usize,
}

#[derive(Default)]
struct CountingState {
    counters: StorageCounters,
    names: HashMap<usize, String>,
}

/// Decorator that counts segments without changing what the delegate does.
pub struct CountingStorageProvider {
    delegate: Arc<dyn StorageProvider>,
    state: Mutex<CountingState>,
}

impl CountingStorageProvider {
    /// Wraps `delegate`.
    pub fn new(delegate: Arc<dyn StorageProvider>) -> Self {
        CountingStorageProvider {
            delegate,
            state: Mutex::new(CountingState::default()),
        }
    }

    /// A consistent snapshot of all counters.
    pub fn counters(&self) -> StorageCounters {
        self.state.lock().counters
    }

    /// Successful allocations so far.
    pub fn num_allocated(&self) -> usize {
        self.counters().num_allocated
    }

    /// Deletions so far.
    pub fn num_deleted(&self) -> usize {
        self.counters().num_deleted
    }

    /// Failed allocations so far.
    pub fn num_failed(&self) -> usize {
        self.counters().num_failed
    }

    /// Segments currently live.
    pub fn num_live(&self) -> usize {
        self.counters().num_live
    }

    /// Diagnostic names of the live segments, sorted.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().names.values().cloned().collect();
        names.sort();
        names
    }
}

impl StorageProvider for CountingStorageProvider {
    fn segment_size(&self) -> usize {
        self.delegate.segment_size()
    }

    fn new_storage(&self, name: Option<&str>) -> Result<Storage, StorageError> {
        let result = self.delegate.new_storage(name);
        let mut state = self.state.lock();
        match &result {
            Ok(storage) => {
                let c = &mut state.counters;
                c.num_allocated += 1;
                c.num_live += 1;
                c.max_live = c.max_live.max(c.num_live);
                state
                    .names
                    .insert(storage.addr(), name.unwrap_or("unnamed").to_string());
            }
            Err(_) => state.counters.num_failed += 1,
        }
        result
    }

    fn delete_storage(&self, storage: Storage) {
        let addr = storage.addr();
        self.delegate.delete_storage(storage);
        let mut state = self.state.lock();
        assert!(
            state.counters.num_live > 0,
            "delete_storage without a live segment"
        );
        state.counters.num_deleted += 1;
        state.counters.num_live -= 1;
        state.names.remove(&addr);
    }

    fn provider_name(&self) -> &'static str {
        "counting"
    }
}
