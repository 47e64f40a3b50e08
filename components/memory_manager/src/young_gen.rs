//! Young generation: a semi-space pair of segments.
//!
//! New cells are bump-allocated in the active segment. A young collection
//! evacuates survivors Cheney-style into the to-space segment (or promotes
//! them to the old generation) and then swaps the two spaces, so the
//! from-space becomes empty in one step.

use core_types::CellKind;

use crate::cell::CellHandle;
use crate::segment::Segment;

/// Semi-space young generation.
#[derive(Debug)]
pub struct YoungGeneration {
    /// The space where objects are allocated
    active: Segment,
    /// The space survivors are copied into during a collection
    to_space: Segment,
    /// Cells allocated (or copied) into the active space since the last swap
    cell_count: usize,
}

impl YoungGeneration {
    /// Creates a young generation from two fresh segments.
    pub fn new(active: Segment, to_space: Segment) -> Self {
        YoungGeneration {
            active,
            to_space,
            cell_count: 0,
        }
    }

    /// Allocates a cell in the active space.
    ///
    /// # Returns
    ///
    /// The new cell, or `None` if the active space is exhausted.
    pub fn alloc(&mut self, kind: CellKind, size: usize) -> Option<CellHandle> {
        let cell = self.active.alloc(kind, size)?;
        self.cell_count += 1;
        Some(cell)
    }

    /// Reserves raw bytes in the to-space for an evacuated cell.
    pub fn bump_to_space(&mut self, size: usize) -> Option<usize> {
        self.to_space.bump(size)
    }

    /// Whether `addr` lies in the space currently being allocated from.
    #[inline]
    pub fn in_from_space(&self, addr: usize) -> bool {
        self.active.contains(addr)
    }

    /// Whether `addr` lies in the to-space.
    #[inline]
    pub fn in_to_space(&self, addr: usize) -> bool {
        self.to_space.contains(addr)
    }

    /// Whether `addr` lies in either space.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.in_from_space(addr) || self.in_to_space(addr)
    }

    /// Whether `addr` is an allocated address of the active space.
    #[inline]
    pub fn contains_live(&self, addr: usize) -> bool {
        self.active.contains_allocated(addr)
    }

    /// Completes a collection: the to-space becomes the active space and the
    /// old active space is emptied.
    pub fn swap_spaces(&mut self, survivors: usize) {
        std::mem::swap(&mut self.active, &mut self.to_space);
        self.to_space.reset();
        self.cell_count = survivors;
    }

    /// The active space.
    pub fn active(&self) -> &Segment {
        &self.active
    }

    /// The to-space.
    pub fn to_space(&self) -> &Segment {
        &self.to_space
    }

    /// Bytes allocated in the active space.
    pub fn used(&self) -> usize {
        self.active.used()
    }

    /// Bytes left in the active space.
    pub fn available(&self) -> usize {
        self.active.available()
    }

    /// Size of one space.
    pub fn capacity(&self) -> usize {
        self.active.size()
    }

    /// Number of cells in the active space.
    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Whether the active space holds no cells.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Gives both segments back, for return to the provider.
    pub fn into_segments(self) -> [Segment; 2] {
        [self.active, self.to_space]
    }
}
