//! Incremental old-generation marking
//!
//! Full collections can run their mark phase in slices interleaved with the
//! mutator instead of in one pause:
//!
//! - **Start**: a young collection with forced promotion empties the young
//!   generation, the roots are scanned and the marker enters
//!   [`GcPhase::Mark`] with the roots on the mark stack.
//!
//! - **Slices**: [`Heap::incremental_step`] drains a bounded number of
//!   cells. Allocation performs a slice every
//!   [`IncrementalConfig::alloc_bytes_per_slice`] bytes.
//!
//! - **Write Barrier Integration**: while marking, overwriting a pointer
//!   field of an old cell records the previous referent in a
//!   [`WriteBarrierBuffer`] (snapshot-at-the-beginning). Cells allocated in
//!   the old generation during marking are allocated black.
//!
//! - **Weak Read Barrier**: reading a weak reference while marking hands
//!   out a strong reference the marker may not have seen. White old targets
//!   returned by such reads are queued and grayed at the next flush.
//!
//! - **Finish**: a remark pause promotes the young generation, rescans the
//!   roots, drains what is left and then runs weak marking, finalization and
//!   sweeping like a full collection.
//!
//! # Tri-Color Marking
//!
//! - **White**: mark bit clear (potentially garbage)
//! - **Gray**: mark bit set, on the mark stack
//! - **Black**: mark bit set, fields scanned
//!
//! The barrier keeps every cell reachable at the start of marking from
//! turning white behind the marker's back.

use std::cell::RefCell;

use crossbeam_deque::{Injector, Steal, Worker};

use crate::cell::CellHandle;
use crate::gc;
use crate::heap::Heap;

/// State of the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcPhase {
    /// No collection in progress, mutator running normally
    #[default]
    Idle,
    /// Roots are being reported; allocation is forbidden
    RootScan,
    /// Tracing (young evacuation or old marking)
    Mark,
    /// Weak slots are being reported and resolved
    WeakMark,
    /// Finalizers of dead cells are running
    Finalize,
    /// Dead old cells are being reclaimed
    Sweep,
}

/// Gray cells waiting to be scanned.
///
/// The marker works from a local deque; cells discovered outside a slice
/// (roots, barrier records) enter through the injector.
pub struct MarkStack {
    /// Local worker deque of the marker
    local: Worker<CellHandle>,
    /// Entry point for roots and barrier records
    injector: Injector<CellHandle>,
    /// Number of queued cells
    size: usize,
}

impl MarkStack {
    /// Creates an empty mark stack.
    pub fn new() -> Self {
        MarkStack {
            local: Worker::new_lifo(),
            injector: Injector::new(),
            size: 0,
        }
    }

    /// Pushes a gray cell discovered while scanning.
    pub fn push(&mut self, cell: CellHandle) {
        self.local.push(cell);
        self.size += 1;
    }

    /// Pushes a gray cell discovered outside a slice.
    pub fn push_global(&mut self, cell: CellHandle) {
        self.injector.push(cell);
        self.size += 1;
    }

    /// Pops the next cell to scan, local work first.
    pub fn pop(&mut self) -> Option<CellHandle> {
        if let Some(cell) = self.local.pop() {
            self.size -= 1;
            return Some(cell);
        }
        loop {
            match self.injector.steal_batch_and_pop(&self.local) {
                Steal::Success(cell) => {
                    self.size -= 1;
                    return Some(cell);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Returns true if no cell is queued.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of queued cells.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Drops every queued cell.
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }
}

impl Default for MarkStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Previous referents recorded by the write barrier during marking.
#[derive(Debug)]
pub struct WriteBarrierBuffer {
    /// Recorded cells awaiting a flush
    buffer: Vec<CellHandle>,
    /// Size at which the barrier flushes eagerly
    capacity: usize,
    /// Number of flushes performed
    flush_count: usize,
}

impl WriteBarrierBuffer {
    /// Creates a buffer that asks for a flush after `capacity` records.
    pub fn new(capacity: usize) -> Self {
        WriteBarrierBuffer {
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            flush_count: 0,
        }
    }

    /// Records a cell that may have lost its last marked referrer.
    ///
    /// Returns true if the buffer is now full and should be flushed.
    pub fn record(&mut self, cell: CellHandle) -> bool {
        self.buffer.push(cell);
        self.buffer.len() >= self.capacity
    }

    /// Removes and returns every recorded cell.
    pub fn take(&mut self) -> Vec<CellHandle> {
        self.flush_count += 1;
        std::mem::take(&mut self.buffer)
    }

    /// Number of recorded cells.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of flushes so far.
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for WriteBarrierBuffer {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Configuration for incremental marking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalConfig {
    /// Start incremental cycles instead of full collections when the old
    /// generation passes its occupancy threshold
    pub enabled: bool,
    /// Maximum cells scanned per slice
    pub max_cells_per_slice: usize,
    /// Bytes allocated between two slices
    pub alloc_bytes_per_slice: usize,
    /// Barrier records buffered before an eager flush
    pub barrier_buffer_capacity: usize,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        IncrementalConfig {
            enabled: false,
            max_cells_per_slice: 10_000,
            alloc_bytes_per_slice: 64 * 1024,
            barrier_buffer_capacity: 256,
        }
    }
}

/// Statistics for incremental marking.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IncrementalStats {
    /// Incremental cycles started
    pub cycles: u64,
    /// Marking slices performed
    pub slices: u64,
    /// Cells scanned across all slices
    pub cells_marked: u64,
    /// Barrier records taken
    pub barrier_records: u64,
    /// White targets handed out by weak reads during marking
    pub weak_read_records: u64,
}

/// Marking state carried between slices.
#[derive(Default)]
pub(crate) struct IncrementalMarker {
    pub(crate) mark_stack: MarkStack,
    pub(crate) barrier: WriteBarrierBuffer,
    /// Filled from `&self` accessors, hence the `RefCell`
    pub(crate) weak_reads: RefCell<Vec<CellHandle>>,
    pub(crate) active: bool,
    pub(crate) bytes_since_slice: usize,
}

impl IncrementalMarker {
    pub(crate) fn new(config: &IncrementalConfig) -> Self {
        IncrementalMarker {
            mark_stack: MarkStack::new(),
            barrier: WriteBarrierBuffer::new(config.barrier_buffer_capacity),
            weak_reads: RefCell::new(Vec::new()),
            active: false,
            bytes_since_slice: 0,
        }
    }

    pub(crate) fn begin(&mut self) {
        self.mark_stack.clear();
        self.barrier.clear();
        self.weak_reads.get_mut().clear();
        self.bytes_since_slice = 0;
        self.active = true;
    }

    pub(crate) fn end(&mut self) {
        self.active = false;
        self.mark_stack.clear();
        self.barrier.clear();
        self.weak_reads.get_mut().clear();
    }

    fn has_pending_records(&self) -> bool {
        !self.barrier.is_empty() || !self.weak_reads.borrow().is_empty()
    }
}

impl Heap {
    /// Begins an incremental old-generation collection.
    ///
    /// Performs a young collection with forced promotion and scans the roots.
    /// The mutator then runs normally; marking advances through
    /// [`incremental_step`](Heap::incremental_step) and allocation.
    ///
    /// # Returns
    ///
    /// `false` if a collection is already in progress.
    pub fn start_incremental_collection(&mut self) -> bool {
        if self.in_gc || self.marker.active {
            return false;
        }
        log::debug!("{}: starting incremental marking", self.config.name);
        self.stats.incremental.cycles += 1;
        self.start_marking();
        true
    }

    /// Performs one marking slice.
    ///
    /// # Returns
    ///
    /// `true` once no marking work remains, at which point
    /// [`finish_incremental_collection`](Heap::finish_incremental_collection)
    /// only has the remark pause left to do.
    pub fn incremental_step(&mut self) -> bool {
        if !self.marker.active {
            return true;
        }
        self.flush_barrier_buffer();
        let budget = self.config.incremental.max_cells_per_slice.max(1);
        let scanned = gc::drain_mark_stack(
            &mut self.old,
            &mut self.marker.mark_stack,
            self.segment_size,
            Some(budget),
        );
        self.stats.incremental.slices += 1;
        self.stats.incremental.cells_marked += scanned as u64;
        log::trace!(
            "{}: marking slice scanned {} cells, {} queued",
            self.config.name,
            scanned,
            self.marker.mark_stack.len()
        );
        self.marker.mark_stack.is_empty() && !self.marker.has_pending_records()
    }

    /// Returns true while an incremental collection is marking.
    pub fn is_marking(&self) -> bool {
        self.marker.active
    }

    /// Completes the current incremental collection synchronously. Does
    /// nothing if none is in progress.
    pub fn finish_incremental_collection(&mut self) {
        if self.marker.active {
            self.complete_marking();
        }
    }

    /// Weak read barrier. Queues `target` for marking if it is a white old
    /// cell and marking is in progress, then returns it.
    pub(crate) fn weak_read_barrier(&self, target: Option<CellHandle>) -> Option<CellHandle> {
        if let Some(cell) = target {
            if self.marker.active
                && self.old.contains(cell.addr(), self.segment_size)
                && !self.old.is_marked(cell.addr(), self.segment_size)
            {
                self.marker.weak_reads.borrow_mut().push(cell);
            }
        }
        target
    }

    /// Moves barrier records and weak read records onto the mark stack,
    /// graying the white ones.
    pub(crate) fn flush_barrier_buffer(&mut self) {
        if !self.marker.has_pending_records() {
            return;
        }
        let mut records = if self.marker.barrier.is_empty() {
            Vec::new()
        } else {
            self.marker.barrier.take()
        };
        self.stats.incremental.barrier_records += records.len() as u64;
        let weak_reads = self.marker.weak_reads.get_mut();
        self.stats.incremental.weak_read_records += weak_reads.len() as u64;
        records.append(weak_reads);
        for cell in records {
            if self.old.contains(cell.addr(), self.segment_size)
                && self.old.mark(cell.addr(), self.segment_size)
            {
                self.marker.mark_stack.push_global(cell);
            }
        }
    }

    /// Accounts allocation towards the next slice; finishes the cycle once
    /// marking runs dry.
    pub(crate) fn incremental_alloc_tick(&mut self, bytes: usize) {
        self.marker.bytes_since_slice += bytes;
        if self.marker.bytes_since_slice < self.config.incremental.alloc_bytes_per_slice {
            return;
        }
        self.marker.bytes_since_slice = 0;
        if self.incremental_step() {
            self.finish_incremental_collection();
        }
    }
}
