//! Heap segments.
//!
//! A segment wraps one provider [`Storage`] block. Cells are carved out of
//! it by bumping `level` towards the end; everything between the base and
//! `level` is a parseable sequence of cells. Mark bits live out of line, one
//! bit per 8-byte granule.

use core_types::layout::{heap_align, HEAP_ALIGN, MIN_CELL_SIZE};
use core_types::CellKind;
use storage_provider::Storage;

use crate::cell::{self, CellHandle, CellHeader};
use crate::error::invariant_violation;

/// Out-of-line mark bitmap of a segment.
#[derive(Debug)]
pub struct MarkBits {
    bits: Vec<u64>,
}

impl MarkBits {
    fn new(segment_size: usize) -> Self {
        let granules = segment_size / HEAP_ALIGN;
        MarkBits {
            bits: vec![0; (granules + 63) / 64],
        }
    }

    #[inline]
    fn locate(offset: usize) -> (usize, u64) {
        let granule = offset / HEAP_ALIGN;
        (granule / 64, 1 << (granule % 64))
    }

    /// Sets the bit for `offset`; returns true if it was clear.
    #[inline]
    pub fn set(&mut self, offset: usize) -> bool {
        let (word, bit) = Self::locate(offset);
        let was_clear = self.bits[word] & bit == 0;
        self.bits[word] |= bit;
        was_clear
    }

    /// Whether the bit for `offset` is set.
    #[inline]
    pub fn get(&self, offset: usize) -> bool {
        let (word, bit) = Self::locate(offset);
        self.bits[word] & bit != 0
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// A provider-backed region subdivided into cells.
#[derive(Debug)]
pub struct Segment {
    storage: Storage,
    level: usize,
    marks: MarkBits,
}

impl Segment {
    /// Wraps a fresh, zeroed storage block.
    pub fn new(storage: Storage) -> Self {
        let level = storage.addr();
        let marks = MarkBits::new(storage.size());
        Segment {
            storage,
            level,
            marks,
        }
    }

    /// First byte of the segment.
    #[inline]
    pub fn base(&self) -> usize {
        self.storage.addr()
    }

    /// One past the last byte of the segment.
    #[inline]
    pub fn end(&self) -> usize {
        self.storage.end()
    }

    /// Current bump pointer.
    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Bytes below the bump pointer.
    #[inline]
    pub fn used(&self) -> usize {
        self.level - self.base()
    }

    /// Bytes above the bump pointer.
    #[inline]
    pub fn available(&self) -> usize {
        self.end() - self.level
    }

    /// Segment size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.storage.size()
    }

    /// Whether `addr` lies inside the segment.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.storage.contains(addr)
    }

    /// Whether `addr` lies in the allocated part of the segment.
    #[inline]
    pub fn contains_allocated(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.level
    }

    /// Whether no cell has been allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.level == self.base()
    }

    /// Reserves `size` bytes at the bump pointer without initializing them.
    ///
    /// # Returns
    ///
    /// The start of the reserved range, or `None` if the segment is full.
    pub fn bump(&mut self, size: usize) -> Option<usize> {
        let size = heap_align(size);
        if size > self.available() {
            return None;
        }
        let addr = self.level;
        self.level += size;
        Some(addr)
    }

    /// Allocates and initializes a cell.
    ///
    /// The header is written and the payload zeroed before this returns.
    ///
    /// # Arguments
    ///
    /// * `kind` - Kind of the new cell
    /// * `size` - Allocation size, header included
    ///
    /// # Returns
    ///
    /// The new cell, or `None` when the segment is exhausted. Exhaustion is
    /// an internal retry signal for the heap.
    pub fn alloc(&mut self, kind: CellKind, size: usize) -> Option<CellHandle> {
        let size = heap_align(size.max(MIN_CELL_SIZE));
        let addr = self.bump(size)?;
        // SAFETY: the range was just reserved inside this segment.
        unsafe { cell::init_cell(addr, kind, size, 0) };
        CellHandle::from_addr(addr)
    }

    /// Forgets every cell.
    pub fn reset(&mut self) {
        self.level = self.base();
    }

    /// Moves the bump pointer back to `level`, discarding everything above.
    pub fn truncate(&mut self, level: usize) {
        if level < self.base() || level > self.level {
            invariant_violation!(
                "truncate to {:#x} outside [{:#x}, {:#x}]",
                level,
                self.base(),
                self.level
            );
        }
        self.level = level;
    }

    /// Sets the mark bit of the cell at `addr`; returns true if it was clear.
    #[inline]
    pub fn mark(&mut self, addr: usize) -> bool {
        let offset = addr - self.base();
        self.marks.set(offset)
    }

    /// Whether the cell at `addr` is marked.
    #[inline]
    pub fn is_marked(&self, addr: usize) -> bool {
        self.marks.get(addr - self.base())
    }

    /// Clears all mark bits.
    pub fn clear_marks(&mut self) {
        self.marks.clear();
    }

    /// Number of marked cells.
    pub fn marked_count(&self) -> usize {
        self.marks.count()
    }

    /// Iterates over the cells below the bump pointer.
    pub fn cells(&self) -> SegmentCells<'_> {
        SegmentCells {
            segment: self,
            cursor: self.base(),
        }
    }

    /// Gives the storage back, for return to the provider.
    pub fn into_storage(self) -> Storage {
        self.storage
    }
}

/// Iterator over the cells of a segment.
pub struct SegmentCells<'a> {
    segment: &'a Segment,
    cursor: usize,
}

impl Iterator for SegmentCells<'_> {
    type Item = (CellHandle, CellHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.segment.level {
            return None;
        }
        let addr = self.cursor;
        // SAFETY: everything below `level` is a sequence of initialized cells.
        let header = unsafe { cell::read_header(addr) };
        let size = header.size();
        if size < MIN_CELL_SIZE || addr + size > self.segment.level {
            invariant_violation!("corrupt cell at {:#x} with size {}", addr, size);
        }
        self.cursor += size;
        CellHandle::from_addr(addr).map(|h| (h, header))
    }
}
