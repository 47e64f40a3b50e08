//! Heap statistics and diagnostics snapshots.

use std::time::Duration;

use core_types::CellKind;

use crate::concurrent_gc::IncrementalStats;
use crate::gc::GcKind;

/// Point-in-time summary of the heap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeapInfo {
    /// Segments currently held from the provider
    pub segments: usize,
    /// Bytes of all held segments
    pub heap_size: usize,
    /// Bytes occupied by cells in both generations
    pub allocated_bytes: usize,
    /// Bytes occupied by cells in the young generation
    pub young_allocated_bytes: usize,
    /// Bytes occupied by cells in the old generation
    pub old_allocated_bytes: usize,
    /// Bytes on the old generation's free lists
    pub free_list_bytes: usize,
    /// Bytes credited through `credit_external_memory`
    pub external_bytes: usize,
    /// Estimated malloc'd bytes kept alive by cells
    pub malloc_size_estimate: usize,
    /// Resources in the native table
    pub native_resources: usize,
    /// Weak slots in use
    pub weak_refs: usize,
    /// Entries in the root table
    pub roots: usize,
    /// Young collections so far
    pub young_collections: u64,
    /// Full collections so far
    pub full_collections: u64,
}

/// Outcome of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStats {
    /// Young or full
    pub kind: GcKind,
    /// Allocated bytes of the collected space before the cycle
    pub bytes_before: usize,
    /// Allocated bytes of the collected space after the cycle
    pub bytes_after: usize,
    /// Cells copied within the young generation
    pub cells_copied: usize,
    /// Cells promoted into the old generation
    pub cells_promoted: usize,
    /// Bytes promoted into the old generation
    pub bytes_promoted: usize,
    /// Dead old cells reclaimed by sweeping
    pub cells_swept: usize,
    /// Finalizers run
    pub cells_finalized: usize,
    /// Weak slots cleared because their referent died
    pub weak_refs_cleared: usize,
    /// Old segments returned to the provider
    pub segments_released: usize,
    /// Wall time of the cycle
    pub duration: Duration,
}

impl CollectionStats {
    pub(crate) fn new(kind: GcKind, bytes_before: usize) -> Self {
        CollectionStats {
            kind,
            bytes_before,
            bytes_after: 0,
            cells_copied: 0,
            cells_promoted: 0,
            bytes_promoted: 0,
            cells_swept: 0,
            cells_finalized: 0,
            weak_refs_cleared: 0,
            segments_released: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Totals over the lifetime of a heap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CumulativeHeapStats {
    /// Young collections
    pub young_collections: u64,
    /// Full collections
    pub full_collections: u64,
    /// Time spent in all collections
    pub total_gc_time: Duration,
    /// Longest single pause
    pub max_pause: Duration,
    /// Bytes promoted into the old generation
    pub bytes_promoted: u64,
    /// Bytes reclaimed by sweeping the old generation
    pub bytes_swept: u64,
    /// Finalizers run
    pub cells_finalized: u64,
    /// Finalizers that reported an error or panicked
    pub finalizer_failures: u64,
    /// Weak slots cleared because their referent died
    pub weak_refs_cleared: u64,
    /// Cells allocated
    pub cells_allocated: u64,
    /// Bytes allocated
    pub bytes_allocated: u64,
    /// Incremental marking totals
    pub incremental: IncrementalStats,
}

impl CumulativeHeapStats {
    pub(crate) fn record(&mut self, collection: &CollectionStats) {
        match collection.kind {
            GcKind::Young => self.young_collections += 1,
            GcKind::Full => self.full_collections += 1,
        }
        self.total_gc_time += collection.duration;
        self.max_pause = self.max_pause.max(collection.duration);
        self.bytes_promoted += collection.bytes_promoted as u64;
        self.cells_finalized += collection.cells_finalized as u64;
        self.weak_refs_cleared += collection.weak_refs_cleared as u64;
    }
}

/// Live cells and bytes of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCount {
    /// Kind counted
    pub kind: CellKind,
    /// Number of cells
    pub cells: usize,
    /// Bytes occupied
    pub bytes: usize,
}

/// Detailed snapshot for debugging and heap dumps.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugHeapInfo {
    /// Summary figures
    pub info: HeapInfo,
    /// Per-kind breakdown, kinds with no cells omitted
    pub kinds: Vec<KindCount>,
    /// Cells registered for finalization
    pub finalizable_cells: usize,
    /// Cells registered for weak marking
    pub weak_bearing_cells: usize,
    /// Old cells in the remembered set
    pub remembered_cells: usize,
    /// Last young collection, if any
    pub last_young: Option<CollectionStats>,
    /// Last full collection, if any
    pub last_full: Option<CollectionStats>,
}

/// Segments held by each generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCounts {
    /// Young segments (active space and to-space)
    pub young: usize,
    /// Old segments
    pub old: usize,
}

impl SegmentCounts {
    /// All segments.
    pub fn total(&self) -> usize {
        self.young + self.old
    }
}
