//! Heap management with generational garbage collection.
//!
//! This module implements a generational heap with:
//! - Young generation: semi-space copying collector
//! - Old generation: mark-and-sweep collector with free lists
//! - Write barriers for tracking old-to-young pointers
//! - Finalizer and weak-reference registries
//!
//! The heap owns every segment it uses and returns them to its
//! [`StorageProvider`] when dropped.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use core_types::layout::heap_align;
use core_types::CellKind;
use storage_provider::{Storage, StorageProvider};

use crate::cell::{self, CellHandle, HasFinalizer};
use crate::concurrent_gc::{GcPhase, IncrementalMarker};
use crate::config::GcConfig;
use crate::error::{invariant_violation, Generation, HeapError};
use crate::gc::grow_old;
use crate::native::NativeTable;
use crate::old_gen::OldGeneration;
use crate::roots::{RootId, RootProvider, RootTable};
use crate::segment::Segment;
use crate::stats::{
    CollectionStats, CumulativeHeapStats, DebugHeapInfo, HeapInfo, KindCount, SegmentCounts,
};
use crate::vtable::vtable;
use crate::weak_ref::{WeakRef, WeakRefTable};
use crate::write_barrier::RememberedSet;
use crate::young_gen::YoungGeneration;

/// Cells registered for a collector service, split by generation.
#[derive(Debug, Default)]
pub(crate) struct CellRegistry {
    pub(crate) young: Vec<CellHandle>,
    pub(crate) old: Vec<CellHandle>,
}

impl CellRegistry {
    fn len(&self) -> usize {
        self.young.len() + self.old.len()
    }
}

/// A garbage-collected heap.
///
/// The heap is single-threaded. Collections only happen inside allocation
/// calls and explicit [`collect`](Heap::collect) calls; any young
/// [`CellHandle`] not reachable through a root may be invalidated by them.
pub struct Heap {
    pub(crate) config: GcConfig,
    pub(crate) provider: Arc<dyn StorageProvider>,
    pub(crate) segment_size: usize,
    pub(crate) large_object_threshold: usize,
    /// Taken apart in `Drop` to hand the segments back.
    pub(crate) young: ManuallyDrop<YoungGeneration>,
    pub(crate) old: OldGeneration,
    pub(crate) roots: RootTable,
    /// Arguments of constructors in progress, scanned as roots.
    pub(crate) scratch: Vec<Option<CellHandle>>,
    pub(crate) root_provider: Option<Box<dyn RootProvider>>,
    pub(crate) weak_refs: WeakRefTable,
    pub(crate) natives: NativeTable,
    pub(crate) remembered: RememberedSet,
    pub(crate) finalizable: CellRegistry,
    pub(crate) weak_cells: CellRegistry,
    pub(crate) external: HashMap<CellHandle, usize>,
    pub(crate) external_bytes: usize,
    pub(crate) pending_full_gc: bool,
    pub(crate) marker: IncrementalMarker,
    pub(crate) phase: GcPhase,
    pub(crate) in_gc: bool,
    pub(crate) stats: CumulativeHeapStats,
    pub(crate) last_young: Option<CollectionStats>,
    pub(crate) last_full: Option<CollectionStats>,
}

impl Heap {
    /// Creates a heap drawing segments from `provider`.
    ///
    /// Acquires the two young segments and `min_old_segments` old segments
    /// up front. Anything acquired is given back if a later request fails.
    ///
    /// # Arguments
    ///
    /// * `config` - Collector configuration
    /// * `provider` - Source of segments; may be shared with other heaps
    ///
    /// # Returns
    ///
    /// The heap, or the configuration or storage error that prevented it.
    pub fn new(config: GcConfig, provider: Arc<dyn StorageProvider>) -> Result<Heap, HeapError> {
        let segment_size = provider.segment_size();
        config.validate(segment_size)?;

        let mut names = vec![
            format!("{}-young-0", config.name),
            format!("{}-young-1", config.name),
        ];
        names.extend((0..config.min_old_segments).map(|i| format!("{}-old-{}", config.name, i)));
        let mut acquired: Vec<Storage> = Vec::with_capacity(names.len());
        for name in &names {
            match provider.new_storage(Some(name)) {
                Ok(storage) => acquired.push(storage),
                Err(err) => {
                    log::warn!("{}: cannot create heap: {}", config.name, err);
                    for storage in acquired {
                        provider.delete_storage(storage);
                    }
                    return Err(err.into());
                }
            }
        }

        let mut storages = acquired.into_iter();
        let (Some(active), Some(to_space)) = (storages.next(), storages.next()) else {
            invariant_violation!("young segments missing after acquisition");
        };
        let young = YoungGeneration::new(Segment::new(active), Segment::new(to_space));
        let mut old = OldGeneration::new();
        for storage in storages {
            old.add_segment(storage);
        }

        log::debug!(
            "{}: heap created on {} provider, segment size {}, {} old segments",
            config.name,
            provider.provider_name(),
            segment_size,
            old.segment_count()
        );
        Ok(Heap {
            large_object_threshold: config.large_object_threshold_for(segment_size),
            marker: IncrementalMarker::new(&config.incremental),
            config,
            provider,
            segment_size,
            young: ManuallyDrop::new(young),
            old,
            roots: RootTable::new(),
            scratch: Vec::new(),
            root_provider: None,
            weak_refs: WeakRefTable::new(),
            natives: NativeTable::new(),
            remembered: RememberedSet::new(),
            finalizable: CellRegistry::default(),
            weak_cells: CellRegistry::default(),
            external: HashMap::new(),
            external_bytes: 0,
            pending_full_gc: false,
            phase: GcPhase::Idle,
            in_gc: false,
            stats: CumulativeHeapStats::default(),
            last_young: None,
            last_full: None,
        })
    }

    /// Creates a heap on the platform's default provider.
    pub fn with_default_provider(config: GcConfig, segment_size: usize) -> Result<Heap, HeapError> {
        let provider = storage_provider::default_provider(segment_size)?;
        Heap::new(config, provider)
    }

    /// Allocates a cell.
    ///
    /// The header is written and the payload zeroed before this returns.
    /// May run a collection first.
    ///
    /// # Arguments
    ///
    /// * `kind` - Kind of the new cell
    /// * `size` - Requested size in bytes, header included; raised to the
    ///   kind's minimum and rounded up to the heap alignment
    /// * `has_finalizer` - Whether the kind's finalizer must run when the
    ///   cell dies
    ///
    /// # Returns
    ///
    /// The new cell, or [`HeapError::OutOfMemory`] if no space could be
    /// found even after a full collection.
    pub fn allocate(
        &mut self,
        kind: CellKind,
        size: usize,
        has_finalizer: HasFinalizer,
    ) -> Result<CellHandle, HeapError> {
        if self.in_gc {
            invariant_violation!("allocation of {} during {:?}", kind, self.phase);
        }
        if has_finalizer == HasFinalizer::Yes && vtable(kind).finalize.is_none() {
            invariant_violation!("{} has no finalizer", kind);
        }
        let size = heap_align(size.max(kind.metadata().min_size()));
        let large = size >= self.large_object_threshold;
        if size > self.segment_size {
            log::warn!(
                "{}: {} bytes for {} exceed the segment size",
                self.config.name,
                size,
                kind
            );
            return Err(HeapError::OutOfMemory {
                requested: size,
                generation: if large { Generation::Old } else { Generation::Young },
            });
        }
        if self.pending_full_gc {
            self.pending_full_gc = false;
            self.full_collection();
        }
        if self.marker.active {
            self.incremental_alloc_tick(size);
        }

        let cell = if large {
            self.allocate_large(kind, size)?
        } else {
            self.allocate_young(kind, size)?
        };

        let in_young = self.young.in_from_space(cell.addr());
        if has_finalizer == HasFinalizer::Yes {
            if in_young {
                self.finalizable.young.push(cell);
            } else {
                self.finalizable.old.push(cell);
            }
        }
        if kind.has_weak_refs() {
            if in_young {
                self.weak_cells.young.push(cell);
            } else {
                self.weak_cells.old.push(cell);
            }
        }
        self.stats.cells_allocated += 1;
        self.stats.bytes_allocated += size as u64;
        Ok(cell)
    }

    fn allocate_young(&mut self, kind: CellKind, size: usize) -> Result<CellHandle, HeapError> {
        if let Some(cell) = self.young.alloc(kind, size) {
            return Ok(cell);
        }
        if self.marker.active {
            self.complete_marking();
        } else {
            self.young_collection(false);
            self.collect_old_if_needed();
        }
        if let Some(cell) = self.young.alloc(kind, size) {
            return Ok(cell);
        }
        self.full_collection();
        if let Some(cell) = self.young.alloc(kind, size) {
            return Ok(cell);
        }
        match self.alloc_in_old(kind, size) {
            Some(cell) => Ok(cell),
            None => {
                log::warn!("{}: out of memory allocating {} ({} bytes)", self.config.name, kind, size);
                Err(HeapError::OutOfMemory {
                    requested: size,
                    generation: Generation::Young,
                })
            }
        }
    }

    fn allocate_large(&mut self, kind: CellKind, size: usize) -> Result<CellHandle, HeapError> {
        if let Some(cell) = self.alloc_in_old(kind, size) {
            return Ok(cell);
        }
        self.full_collection();
        match self.alloc_in_old(kind, size) {
            Some(cell) => Ok(cell),
            None => {
                log::warn!("{}: out of memory allocating {} ({} bytes)", self.config.name, kind, size);
                Err(HeapError::OutOfMemory {
                    requested: size,
                    generation: Generation::Old,
                })
            }
        }
    }

    /// Allocates in the old generation, growing it if allowed. Cells
    /// allocated while marking are black.
    fn alloc_in_old(&mut self, kind: CellKind, size: usize) -> Option<CellHandle> {
        let cell = match self.old.alloc(kind, size) {
            Some(cell) => cell,
            None => {
                if !grow_old(&mut self.old, &*self.provider, &self.config) {
                    return None;
                }
                self.old.alloc(kind, size)?
            }
        };
        if self.marker.active {
            self.old.mark(cell.addr(), self.segment_size);
        }
        Some(cell)
    }

    /// Registers `cell` as a strong root.
    pub fn add_root(&mut self, cell: CellHandle) -> RootId {
        self.roots.add(cell)
    }

    /// Current address of a root.
    pub fn root(&self, id: RootId) -> Option<CellHandle> {
        self.roots.get(id)
    }

    /// Points a root at another cell. Returns `false` for an unknown id.
    pub fn set_root(&mut self, id: RootId, cell: CellHandle) -> bool {
        self.roots.set(id, cell)
    }

    /// Unregisters a root.
    pub fn remove_root(&mut self, id: RootId) -> Option<CellHandle> {
        self.roots.remove(id)
    }

    /// Installs the mutator's root provider, returning the previous one.
    pub fn set_root_provider(
        &mut self,
        provider: Box<dyn RootProvider>,
    ) -> Option<Box<dyn RootProvider>> {
        self.root_provider.replace(provider)
    }

    /// Removes the root provider.
    pub fn take_root_provider(&mut self) -> Option<Box<dyn RootProvider>> {
        self.root_provider.take()
    }

    /// Creates a weak reference to `cell`.
    ///
    /// The owner must report it through
    /// [`RootProvider::mark_weak_roots`] in every collection, or the slot is
    /// freed.
    pub fn create_weak(&mut self, cell: CellHandle) -> WeakRef {
        self.weak_refs.alloc(cell)
    }

    /// Current referent of a weak reference; `None` once it died.
    ///
    /// During incremental marking the referent is kept alive through the
    /// end of the cycle.
    pub fn get_weak(&self, weak: &WeakRef) -> Option<CellHandle> {
        self.weak_read_barrier(self.weak_refs.get(weak))
    }

    /// Generation holding `cell`, or `None` if the heap does not own it.
    pub fn generation_of(&self, cell: CellHandle) -> Option<Generation> {
        if self.young.contains_live(cell.addr()) {
            Some(Generation::Young)
        } else if self.old.contains(cell.addr(), self.segment_size) {
            Some(Generation::Old)
        } else {
            None
        }
    }

    /// Whether `cell` lies in the young generation.
    pub fn is_young(&self, cell: CellHandle) -> bool {
        self.generation_of(cell) == Some(Generation::Young)
    }

    /// Records `bytes` of off-heap memory kept alive by `cell`.
    ///
    /// Crossing [`GcConfig::max_external_bytes`] schedules a full collection
    /// for the next allocation.
    pub fn credit_external_memory(&mut self, cell: CellHandle, bytes: usize) {
        *self.external.entry(cell).or_insert(0) += bytes;
        self.external_bytes += bytes;
        if self.external_bytes > self.config.max_external_bytes && !self.pending_full_gc {
            log::debug!(
                "{}: {} external bytes exceed {}, full collection scheduled",
                self.config.name,
                self.external_bytes,
                self.config.max_external_bytes
            );
            self.pending_full_gc = true;
        }
    }

    /// Releases previously credited off-heap memory.
    pub fn debit_external_memory(&mut self, cell: CellHandle, bytes: usize) {
        if let Some(credited) = self.external.get_mut(&cell) {
            let debit = bytes.min(*credited);
            *credited -= debit;
            self.external_bytes -= debit;
            if *credited == 0 {
                self.external.remove(&cell);
            }
        }
    }

    /// Reacts to memory pressure: runs a full collection and returns every
    /// empty old segment above the configured minimum.
    pub fn on_low_memory(&mut self) {
        if self.in_gc {
            return;
        }
        log::debug!("{}: low memory signal", self.config.name);
        self.full_collection();
        let released = self.old.release_empty(self.config.min_old_segments);
        for storage in released {
            self.provider.delete_storage(storage);
        }
    }

    /// Current collector phase.
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    /// The heap configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Size of every segment.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Kind of a live cell.
    pub fn kind_of(&self, cell: CellHandle) -> CellKind {
        // SAFETY: handles given out by the heap point at cell headers.
        unsafe { cell::read_header(cell.addr()) }.kind()
    }

    /// Size in bytes of a live cell, header included.
    pub fn size_of(&self, cell: CellHandle) -> usize {
        // SAFETY: as above.
        unsafe { cell::read_header(cell.addr()) }.size()
    }

    /// Off-heap bytes kept alive by `cell`, from its kind's malloc-size hook
    /// plus any credited external memory.
    pub fn malloc_size_of(&self, cell: CellHandle) -> usize {
        let native = vtable(self.kind_of(cell))
            .malloc_size
            .map_or(0, |hook| hook(cell, self));
        native + self.external.get(&cell).copied().unwrap_or(0)
    }

    /// Calls `f` with every cell in the heap, young generation first.
    pub fn for_each_cell(&self, mut f: impl FnMut(CellHandle, CellKind, usize)) {
        for (cell, header) in self.young.active().cells() {
            f(cell, header.kind(), header.size());
        }
        self.old
            .for_each_cell(|cell, header| f(cell, header.kind(), header.size()));
    }

    /// Segments held by each generation.
    pub fn segment_counts(&self) -> SegmentCounts {
        SegmentCounts {
            young: 2,
            old: self.old.segment_count(),
        }
    }

    /// Summary of the heap.
    pub fn info(&self) -> HeapInfo {
        let counts = self.segment_counts();
        let young_allocated = self.young.used();
        let old_allocated = self.old.allocated_bytes();
        HeapInfo {
            segments: counts.total(),
            heap_size: counts.total() * self.segment_size,
            allocated_bytes: young_allocated + old_allocated,
            young_allocated_bytes: young_allocated,
            old_allocated_bytes: old_allocated,
            free_list_bytes: self.old.free_bytes(),
            external_bytes: self.external_bytes,
            malloc_size_estimate: self.natives.malloc_size() + self.external_bytes,
            native_resources: self.natives.len(),
            weak_refs: self.weak_refs.live_count(),
            roots: self.roots.len(),
            young_collections: self.stats.young_collections,
            full_collections: self.stats.full_collections,
        }
    }

    /// Detailed snapshot including a per-kind census.
    pub fn debug_info(&self) -> DebugHeapInfo {
        let mut census = vec![(0usize, 0usize); CellKind::COUNT];
        self.for_each_cell(|_, kind, size| {
            let entry = &mut census[kind as usize];
            entry.0 += 1;
            entry.1 += size;
        });
        let kinds = CellKind::ALL
            .iter()
            .zip(census)
            .filter(|(_, (cells, _))| *cells > 0)
            .map(|(&kind, (cells, bytes))| KindCount { kind, cells, bytes })
            .collect();
        DebugHeapInfo {
            info: self.info(),
            kinds,
            finalizable_cells: self.finalizable.len(),
            weak_bearing_cells: self.weak_cells.len(),
            remembered_cells: self.remembered.len(),
            last_young: self.last_young.clone(),
            last_full: self.last_full.clone(),
        }
    }

    /// Lifetime totals.
    pub fn cumulative_stats(&self) -> &CumulativeHeapStats {
        &self.stats
    }

    /// Human-readable listing of every segment.
    pub fn dump_segments(&self) -> String {
        let mut out = String::new();
        let young = [("young/active", self.young.active()), ("young/to", self.young.to_space())];
        for (label, segment) in young {
            let _ = writeln!(
                out,
                "{} {:#x} used {} of {} bytes, {} cells",
                label,
                segment.base(),
                segment.used(),
                segment.size(),
                segment.cells().count()
            );
        }
        for (i, segment) in self.old.segments().iter().enumerate() {
            let (mut live, mut free) = (0, 0);
            for (_, header) in segment.cells() {
                if header.tag == CellKind::Freelist as u8 {
                    free += header.size();
                } else {
                    live += 1;
                }
            }
            let _ = writeln!(
                out,
                "old/{} {:#x} used {} of {} bytes, {} cells, {} bytes free-listed",
                i,
                segment.base(),
                segment.used(),
                segment.size(),
                live,
                free
            );
        }
        out
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.finalize_all();
        // SAFETY: `young` is never used again after this point.
        let young = unsafe { ManuallyDrop::take(&mut self.young) };
        let mut returned = 0;
        for segment in young.into_segments() {
            self.provider.delete_storage(segment.into_storage());
            returned += 1;
        }
        for storage in std::mem::take(&mut self.old).into_storages() {
            self.provider.delete_storage(storage);
            returned += 1;
        }
        log::debug!(
            "{}: heap dropped, {} segments returned to the {} provider",
            self.config.name,
            returned,
            self.provider.provider_name()
        );
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("name", &self.config.name)
            .field("phase", &self.phase)
            .field("info", &self.info())
            .finish()
    }
}
