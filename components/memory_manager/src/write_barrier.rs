//! Write barrier implementation for generational GC
//!
//! Every store of a pointer into a cell goes through
//! [`Heap::write_barrier`]. It has two jobs:
//!
//! - **Generational**: when an old-generation cell is made to point at a
//!   young cell, the owner is added to the [`RememberedSet`]. During a young
//!   collection remembered cells are treated as additional roots, so the
//!   young referent is not collected prematurely.
//! - **Snapshot-at-the-beginning**: while incremental marking is active, the
//!   previous referent of the overwritten slot is recorded so the marker
//!   still visits it.

use std::collections::HashSet;

use crate::cell::CellHandle;
use crate::heap::Heap;

/// Old-generation cells that may hold pointers into the young generation.
#[derive(Debug, Default)]
pub struct RememberedSet {
    cells: HashSet<CellHandle>,
}

impl RememberedSet {
    /// Creates an empty remembered set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an owner. Returns true if it was not already present.
    pub fn insert(&mut self, owner: CellHandle) -> bool {
        self.cells.insert(owner)
    }

    /// Removes an owner.
    pub fn remove(&mut self, owner: CellHandle) -> bool {
        self.cells.remove(&owner)
    }

    /// Whether `owner` is remembered.
    pub fn contains(&self, owner: CellHandle) -> bool {
        self.cells.contains(&owner)
    }

    /// Number of remembered cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if no cell is remembered.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Removes and returns every owner.
    pub fn drain(&mut self) -> Vec<CellHandle> {
        self.cells.drain().collect()
    }

    /// Keeps only the owners for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(CellHandle) -> bool) {
        self.cells.retain(|&cell| keep(cell));
    }

    /// Clears the set.
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

impl Extend<CellHandle> for RememberedSet {
    fn extend<I: IntoIterator<Item = CellHandle>>(&mut self, iter: I) {
        self.cells.extend(iter);
    }
}

impl Heap {
    /// Barrier for a pointer store into `owner`.
    ///
    /// # Arguments
    ///
    /// * `owner` - Cell whose field is written
    /// * `old` - Value the field held before the store
    /// * `new` - Value being stored
    pub(crate) fn write_barrier(
        &mut self,
        owner: CellHandle,
        old: Option<CellHandle>,
        new: Option<CellHandle>,
    ) {
        let owner_is_old = self.old.contains(owner.addr(), self.segment_size);
        if self.marker.active && owner_is_old {
            if let Some(old) = old {
                if self.old.contains(old.addr(), self.segment_size)
                    && !self.old.is_marked(old.addr(), self.segment_size)
                    && self.marker.barrier.record(old)
                {
                    self.flush_barrier_buffer();
                }
            }
        }
        if let Some(new) = new {
            if owner_is_old && self.young.contains_live(new.addr()) {
                self.remembered.insert(owner);
            }
        }
    }
}
