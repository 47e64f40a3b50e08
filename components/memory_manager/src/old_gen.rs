//! Old generation: free-list allocated, mark/sweep collected segments.
//!
//! Every old segment is a parseable sequence of cells up to its bump level.
//! Dead space is turned into `Freelist` cells during sweep and threaded onto
//! size-segregated free lists: one exact bucket per size from 16 to 256 bytes
//! and a single first-fit bucket for everything larger.

use std::collections::HashMap;

use core_types::layout::{heap_align, HEAP_ALIGN, MIN_CELL_SIZE};
use core_types::CellKind;
use storage_provider::Storage;

use crate::cell::{self, CellHandle};
use crate::segment::Segment;

/// Largest size served by an exact bucket.
pub const MAX_SMALL_SIZE: usize = 256;

const SMALL_BUCKETS: usize = (MAX_SMALL_SIZE - MIN_CELL_SIZE) / HEAP_ALIGN + 1;

/// Size-segregated free lists of `(address, size)` pairs.
#[derive(Debug)]
pub struct FreeLists {
    small: Vec<Vec<usize>>,
    large: Vec<(usize, usize)>,
    bytes: usize,
}

impl Default for FreeLists {
    fn default() -> Self {
        FreeLists {
            small: vec![Vec::new(); SMALL_BUCKETS],
            large: Vec::new(),
            bytes: 0,
        }
    }
}

impl FreeLists {
    #[inline]
    fn bucket(size: usize) -> usize {
        (size - MIN_CELL_SIZE) / HEAP_ALIGN
    }

    /// Adds a free cell.
    pub fn push(&mut self, addr: usize, size: usize) {
        debug_assert!(size >= MIN_CELL_SIZE && size % HEAP_ALIGN == 0);
        if size <= MAX_SMALL_SIZE {
            self.small[Self::bucket(size)].push(addr);
        } else {
            self.large.push((addr, size));
        }
        self.bytes += size;
    }

    /// Removes a free cell of at least `size` bytes.
    ///
    /// Exact buckets are tried first, then larger small buckets, then the
    /// large bucket first-fit.
    pub fn take(&mut self, size: usize) -> Option<(usize, usize)> {
        if size <= MAX_SMALL_SIZE {
            for bucket in Self::bucket(size)..SMALL_BUCKETS {
                if let Some(addr) = self.small[bucket].pop() {
                    let found = MIN_CELL_SIZE + bucket * HEAP_ALIGN;
                    self.bytes -= found;
                    return Some((addr, found));
                }
            }
        }
        let index = self.large.iter().position(|&(_, s)| s >= size)?;
        let (addr, found) = self.large.swap_remove(index);
        self.bytes -= found;
        Some((addr, found))
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.small.iter_mut().for_each(Vec::clear);
        self.large.clear();
        self.bytes = 0;
    }

    /// Total bytes on the lists.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.small.iter().map(Vec::len).sum::<usize>() + self.large.len()
    }

    /// Whether the lists are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of sweeping the old generation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    /// Cells that survived.
    pub live_cells: usize,
    /// Bytes held by survivors.
    pub live_bytes: usize,
    /// Dead cells reclaimed.
    pub freed_cells: usize,
    /// Bytes of dead cells reclaimed.
    pub freed_bytes: usize,
}

/// The tenured segments.
#[derive(Debug, Default)]
pub struct OldGeneration {
    segments: Vec<Segment>,
    index: HashMap<usize, usize>,
    free: FreeLists,
}

impl OldGeneration {
    /// Creates an empty old generation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fresh segment.
    pub fn add_segment(&mut self, storage: Storage) {
        let segment = Segment::new(storage);
        self.index.insert(segment.base(), self.segments.len());
        self.segments.push(segment);
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The segments, in acquisition order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total bytes of all segments.
    pub fn capacity(&self) -> usize {
        self.segments.iter().map(Segment::size).sum()
    }

    /// Bytes held by cells (live or not yet swept), excluding free cells.
    pub fn allocated_bytes(&self) -> usize {
        self.segments.iter().map(Segment::used).sum::<usize>() - self.free.bytes()
    }

    /// Bytes on the free lists.
    pub fn free_bytes(&self) -> usize {
        self.free.bytes()
    }

    /// Segment owning `addr`, located by masking with the segment size.
    #[inline]
    pub fn segment_of(&self, addr: usize, segment_size: usize) -> Option<&Segment> {
        let base = addr & !(segment_size - 1);
        self.index.get(&base).map(|&i| &self.segments[i])
    }

    #[inline]
    fn segment_of_mut(&mut self, addr: usize, segment_size: usize) -> Option<&mut Segment> {
        let base = addr & !(segment_size - 1);
        match self.index.get(&base) {
            Some(&i) => Some(&mut self.segments[i]),
            None => None,
        }
    }

    /// Whether `addr` lies in an allocated part of an old segment.
    #[inline]
    pub fn contains(&self, addr: usize, segment_size: usize) -> bool {
        self.segment_of(addr, segment_size)
            .map_or(false, |s| s.contains_allocated(addr))
    }

    /// Sets the mark bit of `addr`; returns true if it was clear.
    #[inline]
    pub fn mark(&mut self, addr: usize, segment_size: usize) -> bool {
        self.segment_of_mut(addr, segment_size)
            .map_or(false, |s| s.mark(addr))
    }

    /// Whether `addr` is marked.
    #[inline]
    pub fn is_marked(&self, addr: usize, segment_size: usize) -> bool {
        self.segment_of(addr, segment_size)
            .map_or(false, |s| s.is_marked(addr))
    }

    /// Reserves `size` bytes without initializing them.
    ///
    /// # Returns
    ///
    /// The address and the actual size, which exceeds `size` when a free
    /// cell's remainder was too small to split off.
    pub fn alloc_raw(&mut self, size: usize) -> Option<(usize, usize)> {
        let size = heap_align(size.max(MIN_CELL_SIZE));
        if let Some((addr, found)) = self.free.take(size) {
            let rest = found - size;
            if rest >= MIN_CELL_SIZE {
                // SAFETY: the remainder lies inside the free cell we own.
                unsafe { cell::write_free_cell(addr + size, rest) };
                self.free.push(addr + size, rest);
                return Some((addr, size));
            }
            return Some((addr, found));
        }
        self.segments
            .iter_mut()
            .find_map(|s| s.bump(size))
            .map(|addr| (addr, size))
    }

    /// Allocates and initializes a cell.
    pub fn alloc(&mut self, kind: CellKind, size: usize) -> Option<CellHandle> {
        let (addr, actual) = self.alloc_raw(size)?;
        // SAFETY: `alloc_raw` handed us `actual` unused bytes.
        unsafe { cell::init_cell(addr, kind, actual, 0) };
        CellHandle::from_addr(addr)
    }

    /// Reclaims every unmarked cell, coalescing adjacent dead space, and
    /// clears all mark bits.
    ///
    /// Dead space at the end of a segment lowers its bump level instead of
    /// becoming a free cell.
    pub fn sweep(&mut self) -> SweepResult {
        let mut result = SweepResult::default();
        self.free.clear();
        for segment in &mut self.segments {
            let mut run: Option<usize> = None;
            let mut cells = Vec::new();
            cells.extend(segment.cells().map(|(h, header)| (h.addr(), header)));
            for (addr, header) in cells {
                let is_free = header.tag == CellKind::Freelist as u8;
                if !is_free && segment.is_marked(addr) {
                    result.live_cells += 1;
                    result.live_bytes += header.size();
                    if let Some(start) = run.take() {
                        // SAFETY: [start, addr) holds only dead cells of this segment.
                        unsafe { cell::write_free_cell(start, addr - start) };
                        self.free.push(start, addr - start);
                    }
                } else {
                    if !is_free {
                        result.freed_cells += 1;
                        result.freed_bytes += header.size();
                    }
                    run.get_or_insert(addr);
                }
            }
            if let Some(start) = run {
                segment.truncate(start);
            }
            segment.clear_marks();
        }
        result
    }

    /// Returns fully empty segments beyond the first `keep` to the caller.
    pub fn release_empty(&mut self, keep: usize) -> Vec<Storage> {
        let mut released = Vec::new();
        let mut kept = Vec::with_capacity(self.segments.len());
        let mut remaining = self.segments.len();
        for segment in self.segments.drain(..) {
            if segment.is_empty() && remaining > keep {
                remaining -= 1;
                released.push(segment.into_storage());
            } else {
                kept.push(segment);
            }
        }
        self.segments = kept;
        self.index = self
            .segments
            .iter()
            .enumerate()
            .map(|(i, s)| (s.base(), i))
            .collect();
        released
    }

    /// Iterates over every non-free cell.
    pub fn for_each_cell(&self, mut f: impl FnMut(CellHandle, &cell::CellHeader)) {
        for segment in &self.segments {
            for (handle, header) in segment.cells() {
                if header.tag != CellKind::Freelist as u8 {
                    f(handle, &header);
                }
            }
        }
    }

    /// Gives every segment back, for return to the provider.
    pub fn into_storages(self) -> Vec<Storage> {
        self.segments
            .into_iter()
            .map(Segment::into_storage)
            .collect()
    }
}
