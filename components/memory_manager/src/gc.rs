//! Collection algorithms.
//!
//! - **Young collection**: Cheney-style evacuation of the young generation.
//!   Roots, the root table and the remembered set are evacuated first; the
//!   to-space is then scanned linearly while promoted cells are scanned from
//!   a stack. Survivors old enough (or all of them, when promotion is
//!   forced) are copied into the old generation.
//! - **Full collection**: a young collection with forced promotion, then a
//!   tri-colour mark of the old generation from the roots and every
//!   remaining young cell, followed by weak marking, finalization and sweep.
//!
//! Cells are never observed half-built: allocation writes the header and
//! zeroes the payload before returning, and the collector never runs while
//! an allocation is in progress.

use std::mem;
use std::ptr;
use std::time::Instant;

use storage_provider::StorageProvider;

use crate::cell::{self, CellHandle, CellHeader, FINALIZED};
use crate::concurrent_gc::{GcPhase, MarkStack};
use crate::config::GcConfig;
use crate::error::invariant_violation;
use crate::heap::Heap;
use crate::native::release_resource;
use crate::old_gen::OldGeneration;
use crate::roots::{RootAcceptor, RootProvider};
use crate::stats::CollectionStats;
use crate::vtable::vtable;
use crate::weak_ref::WeakRefAcceptor;
use crate::young_gen::YoungGeneration;

/// Kind of collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcKind {
    /// Evacuate the young generation only.
    Young,
    /// Collect both generations.
    Full,
}

/// Which liveness rule resolves weak slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeakMode {
    /// Young targets live iff forwarded; everything else is kept.
    Young,
    /// Old targets live iff marked; young targets are kept.
    Full,
}

/// Adds an old segment if the configuration and the provider allow it.
pub(crate) fn grow_old(
    old: &mut OldGeneration,
    provider: &dyn StorageProvider,
    config: &GcConfig,
) -> bool {
    if config.max_old_segments != 0 && old.segment_count() >= config.max_old_segments {
        return false;
    }
    let name = format!("{}-old-{}", config.name, old.segment_count());
    match provider.new_storage(Some(&name)) {
        Ok(storage) => {
            log::trace!("{}: acquired old segment {:?}", config.name, storage);
            old.add_segment(storage);
            true
        }
        Err(err) => {
            log::debug!("{}: old generation cannot grow: {}", config.name, err);
            false
        }
    }
}

/// Copies live young cells out of the from-space.
struct Evacuator<'a> {
    young: &'a mut YoungGeneration,
    old: &'a mut OldGeneration,
    provider: &'a dyn StorageProvider,
    config: &'a GcConfig,
    force_promote: bool,
    /// Promoted cells whose fields still need scanning
    pending: Vec<usize>,
    /// Every cell promoted during this collection
    promoted: Vec<CellHandle>,
    /// Old cells that still point into the young generation
    remembered: Vec<CellHandle>,
    cells_copied: usize,
    bytes_promoted: usize,
}

impl<'a> Evacuator<'a> {
    /// Moves the cell at `addr` if it lives in the from-space.
    ///
    /// # Returns
    ///
    /// The cell's address after evacuation.
    fn evacuate(&mut self, addr: usize) -> usize {
        if !self.young.in_from_space(addr) {
            return addr;
        }
        // SAFETY: from-space cells stay intact until the spaces are swapped.
        let header = unsafe { cell::read_header(addr) };
        if header.is_forwarded() {
            // SAFETY: the header says so.
            return unsafe { cell::forwarding_address(addr) };
        }
        let size = header.size();
        let age = header.age.saturating_add(1);
        let promote = self.force_promote || age >= self.config.promotion_age;
        let mut target = None;
        if promote {
            target = self.old.alloc_raw(size);
            if target.is_none() && grow_old(self.old, self.provider, self.config) {
                target = self.old.alloc_raw(size);
            }
        }
        let (new_addr, new_size, promoted) = match target {
            Some((new_addr, actual)) => (new_addr, actual, true),
            None => match self.young.bump_to_space(size) {
                Some(new_addr) => (new_addr, size, false),
                None => invariant_violation!("to-space exhausted evacuating {} bytes", size),
            },
        };
        // SAFETY: the destination was just reserved with at least `size`
        // bytes and cannot overlap the from-space.
        unsafe {
            ptr::copy_nonoverlapping(addr as *const u8, new_addr as *mut u8, size);
            if new_size > size {
                ptr::write_bytes((new_addr + size) as *mut u8, 0, new_size - size);
            }
            cell::write_header(
                new_addr,
                CellHeader {
                    tag: header.tag,
                    flags: 0,
                    age,
                    size: new_size as u32,
                },
            );
            cell::forward(addr, new_addr);
        }
        if promoted {
            self.pending.push(new_addr);
            if let Some(handle) = CellHandle::from_addr(new_addr) {
                self.promoted.push(handle);
            }
            self.bytes_promoted += new_size;
        } else {
            self.cells_copied += 1;
        }
        new_addr
    }

    /// Evacuates the referent of one pointer slot and rewrites the slot.
    ///
    /// Returns true if the slot now points into the young generation.
    fn visit_slot(&mut self, slot: usize) -> bool {
        // SAFETY: `slot` is a pointer slot of a live cell.
        let word = unsafe { cell::read_word(slot) } as usize;
        if word == 0 {
            return false;
        }
        let new = self.evacuate(word);
        if new != word {
            // SAFETY: as above.
            unsafe { cell::write_word(slot, new as u64) };
        }
        self.young.in_to_space(new)
    }

    /// Evacuates every referent of the cell at `addr`.
    ///
    /// Returns true if the cell still points into the young generation.
    fn scan_cell(&mut self, addr: usize) -> bool {
        let mut has_young = false;
        // SAFETY: only live, non-forwarded cells are scanned.
        unsafe {
            cell::visit_pointer_slots(addr, |slot| has_young |= self.visit_slot(slot));
        }
        has_young
    }

    /// Scans a remembered old cell, keeping it remembered if needed.
    fn scan_remembered(&mut self, owner: CellHandle) {
        if self.scan_cell(owner.addr()) {
            self.remembered.push(owner);
        }
    }

    /// Scans until the to-space and the promotion stack are exhausted.
    fn drain(&mut self) {
        let mut scan = self.young.to_space().base();
        loop {
            while scan < self.young.to_space().level() {
                // SAFETY: everything below the to-space level was copied in
                // whole.
                let size = unsafe { cell::read_header(scan) }.size();
                self.scan_cell(scan);
                scan += size;
            }
            match self.pending.pop() {
                Some(addr) => {
                    if self.scan_cell(addr) {
                        if let Some(owner) = CellHandle::from_addr(addr) {
                            self.remembered.push(owner);
                        }
                    }
                }
                None => break,
            }
        }
    }
}

impl RootAcceptor for Evacuator<'_> {
    fn accept(&mut self, cell: &mut CellHandle) {
        let new = self.evacuate(cell.addr());
        if let Some(moved) = CellHandle::from_addr(new) {
            *cell = moved;
        }
    }
}

/// Grays old cells reachable from roots.
struct MarkAcceptor<'a> {
    old: &'a mut OldGeneration,
    stack: &'a mut MarkStack,
    segment_size: usize,
}

impl MarkAcceptor<'_> {
    fn mark_addr(&mut self, addr: usize) {
        if addr != 0
            && self.old.contains(addr, self.segment_size)
            && self.old.mark(addr, self.segment_size)
        {
            if let Some(cell) = CellHandle::from_addr(addr) {
                self.stack.push_global(cell);
            }
        }
    }
}

impl RootAcceptor for MarkAcceptor<'_> {
    fn accept(&mut self, cell: &mut CellHandle) {
        self.mark_addr(cell.addr());
    }
}

/// Scans gray cells until the stack is empty or `budget` cells were
/// scanned.
///
/// # Returns
///
/// The number of cells scanned.
pub(crate) fn drain_mark_stack(
    old: &mut OldGeneration,
    stack: &mut MarkStack,
    segment_size: usize,
    budget: Option<usize>,
) -> usize {
    let mut scanned = 0;
    while budget.map_or(true, |limit| scanned < limit) {
        let Some(gray) = stack.pop() else {
            break;
        };
        scanned += 1;
        // SAFETY: only live, marked old cells are pushed.
        unsafe {
            cell::visit_pointer_slots(gray.addr(), |slot| {
                let target = cell::read_word(slot) as usize;
                if target != 0
                    && old.contains(target, segment_size)
                    && old.mark(target, segment_size)
                {
                    if let Some(cell) = CellHandle::from_addr(target) {
                        stack.push(cell);
                    }
                }
            });
        }
    }
    scanned
}

fn resolve_weak(
    young: &YoungGeneration,
    old: &OldGeneration,
    segment_size: usize,
    mode: WeakMode,
    target: CellHandle,
) -> Option<CellHandle> {
    let addr = target.addr();
    match mode {
        WeakMode::Young if young.in_from_space(addr) => {
            // SAFETY: from-space cells stay intact until the spaces are swapped.
            let header = unsafe { cell::read_header(addr) };
            if header.is_forwarded() {
                // SAFETY: the header says so.
                CellHandle::from_addr(unsafe { cell::forwarding_address(addr) })
            } else {
                None
            }
        }
        WeakMode::Full if old.contains(addr, segment_size) && !old.is_marked(addr, segment_size) => {
            None
        }
        _ => Some(target),
    }
}

impl Heap {
    /// Runs a collection of the given kind.
    ///
    /// A young collection requested while incremental marking is active
    /// completes the marking cycle instead.
    pub fn collect(&mut self, kind: GcKind) {
        if self.in_gc {
            invariant_violation!("collection requested during {:?}", self.phase);
        }
        match kind {
            GcKind::Young if self.marker.active => self.complete_marking(),
            GcKind::Young => {
                self.young_collection(false);
            }
            GcKind::Full => self.full_collection(),
        }
    }

    /// Runs a full collection, finishing incremental marking if active.
    pub(crate) fn full_collection(&mut self) {
        if !self.marker.active {
            self.start_marking();
        }
        self.complete_marking();
    }

    /// Starts an old-generation collection if occupancy passed the
    /// configured threshold.
    pub(crate) fn collect_old_if_needed(&mut self) {
        if self.marker.active || !self.old_occupancy_exceeded() {
            return;
        }
        if self.config.incremental.enabled {
            self.start_incremental_collection();
        } else {
            self.full_collection();
        }
    }

    pub(crate) fn old_occupancy_exceeded(&self) -> bool {
        let capacity = self.old.capacity();
        capacity > 0
            && self.old.allocated_bytes() as f64 > self.config.full_gc_threshold * capacity as f64
    }

    /// New address of an evacuated from-space cell, `None` if it died.
    fn forwarded(&self, cell: CellHandle) -> Option<CellHandle> {
        // SAFETY: from-space cells stay intact until the spaces are swapped.
        let header = unsafe { cell::read_header(cell.addr()) };
        if header.is_forwarded() {
            // SAFETY: the header says so.
            CellHandle::from_addr(unsafe { cell::forwarding_address(cell.addr()) })
        } else {
            None
        }
    }

    /// Evacuates the young generation.
    ///
    /// # Returns
    ///
    /// Every cell promoted into the old generation.
    pub(crate) fn young_collection(&mut self, force_promote: bool) -> Vec<CellHandle> {
        let nested = self.in_gc;
        self.in_gc = true;
        self.phase = GcPhase::RootScan;
        let start = Instant::now();
        let mut stats = CollectionStats::new(GcKind::Young, self.young.used());
        let mut provider = self.root_provider.take();

        let (promoted, remembered) = {
            let mut evacuator = Evacuator {
                young: &mut *self.young,
                old: &mut self.old,
                provider: &*self.provider,
                config: &self.config,
                force_promote,
                pending: Vec::new(),
                promoted: Vec::new(),
                remembered: Vec::new(),
                cells_copied: 0,
                bytes_promoted: 0,
            };
            if let Some(provider) = provider.as_mut() {
                provider.mark_roots(&mut evacuator);
            }
            self.roots.mark(&mut evacuator);
            for slot in self.scratch.iter_mut() {
                evacuator.accept_nullable(slot);
            }
            self.phase = GcPhase::Mark;
            for owner in self.remembered.drain() {
                evacuator.scan_remembered(owner);
            }
            evacuator.drain();
            stats.cells_copied = evacuator.cells_copied;
            stats.cells_promoted = evacuator.promoted.len();
            stats.bytes_promoted = evacuator.bytes_promoted;
            (evacuator.promoted, evacuator.remembered)
        };

        self.phase = GcPhase::WeakMark;
        for cell in mem::take(&mut self.weak_cells.young) {
            if let Some(moved) = self.forwarded(cell) {
                if self.young.in_to_space(moved.addr()) {
                    self.weak_cells.young.push(moved);
                } else {
                    self.weak_cells.old.push(moved);
                }
            }
        }
        stats.weak_refs_cleared = self.weak_phase(&mut provider, WeakMode::Young);

        self.phase = GcPhase::Finalize;
        let mut dead = Vec::new();
        for cell in mem::take(&mut self.finalizable.young) {
            match self.forwarded(cell) {
                Some(moved) if self.young.in_to_space(moved.addr()) => {
                    self.finalizable.young.push(moved)
                }
                Some(moved) => self.finalizable.old.push(moved),
                None => dead.push(cell),
            }
        }
        for &cell in &dead {
            self.finalize_cell(cell);
        }
        stats.cells_finalized = dead.len();

        for (cell, bytes) in mem::take(&mut self.external) {
            if !self.young.in_from_space(cell.addr()) {
                self.external.insert(cell, bytes);
            } else if let Some(moved) = self.forwarded(cell) {
                *self.external.entry(moved).or_insert(0) += bytes;
            } else {
                self.external_bytes = self.external_bytes.saturating_sub(bytes);
            }
        }

        self.young.swap_spaces(stats.cells_copied);
        self.remembered.extend(remembered);
        self.root_provider = provider;

        stats.bytes_after = self.young.used();
        stats.duration = start.elapsed();
        log::debug!(
            "{}: young collection {} -> {} bytes, {} copied, {} promoted ({} bytes), {} finalized in {:?}",
            self.config.name,
            stats.bytes_before,
            stats.bytes_after,
            stats.cells_copied,
            stats.cells_promoted,
            stats.bytes_promoted,
            stats.cells_finalized,
            stats.duration
        );
        self.stats.record(&stats);
        self.last_young = Some(stats);

        if !nested {
            self.phase = GcPhase::Idle;
            self.in_gc = false;
        }
        promoted
    }

    /// Empties the young generation and grays the roots.
    pub(crate) fn start_marking(&mut self) {
        self.in_gc = true;
        self.young_collection(true);
        self.marker.begin();
        self.phase = GcPhase::RootScan;
        self.mark_roots();
        self.phase = GcPhase::Mark;
        self.in_gc = false;
    }

    /// Grays every old cell referenced by a root or a young cell.
    pub(crate) fn mark_roots(&mut self) {
        let mut provider = self.root_provider.take();
        {
            let mut acceptor = MarkAcceptor {
                old: &mut self.old,
                stack: &mut self.marker.mark_stack,
                segment_size: self.segment_size,
            };
            if let Some(provider) = provider.as_mut() {
                provider.mark_roots(&mut acceptor);
            }
            self.roots.mark(&mut acceptor);
            for slot in self.scratch.iter_mut() {
                acceptor.accept_nullable(slot);
            }
            for (young_cell, _) in self.young.active().cells() {
                // SAFETY: active-space cells are live and initialized.
                unsafe {
                    cell::visit_pointer_slots(young_cell.addr(), |slot| {
                        acceptor.mark_addr(cell::read_word(slot) as usize)
                    });
                }
            }
        }
        self.root_provider = provider;
    }

    /// Remark, weak marking, finalization and sweep of a full collection.
    pub(crate) fn complete_marking(&mut self) {
        self.in_gc = true;
        let start = Instant::now();
        let segment_size = self.segment_size;

        if !self.young.is_empty() {
            for cell in self.young_collection(true) {
                if self.old.mark(cell.addr(), segment_size) {
                    self.marker.mark_stack.push(cell);
                }
            }
        }

        let mut stats = CollectionStats::new(GcKind::Full, self.old.allocated_bytes());
        self.phase = GcPhase::RootScan;
        self.mark_roots();
        self.phase = GcPhase::Mark;
        self.flush_barrier_buffer();
        drain_mark_stack(&mut self.old, &mut self.marker.mark_stack, segment_size, None);

        self.phase = GcPhase::WeakMark;
        let mut provider = self.root_provider.take();
        stats.weak_refs_cleared = self.weak_phase(&mut provider, WeakMode::Full);
        self.root_provider = provider;

        self.phase = GcPhase::Finalize;
        let (live, dead): (Vec<_>, Vec<_>) = mem::take(&mut self.finalizable.old)
            .into_iter()
            .partition(|c| self.old.is_marked(c.addr(), segment_size));
        self.finalizable.old = live;
        for &cell in &dead {
            self.finalize_cell(cell);
        }
        stats.cells_finalized = dead.len();

        let old = &self.old;
        self.remembered.retain(|c| old.is_marked(c.addr(), segment_size));
        self.weak_cells
            .old
            .retain(|c| old.is_marked(c.addr(), segment_size));
        let mut dropped = 0;
        self.external.retain(|c, bytes| {
            let dead =
                old.contains(c.addr(), segment_size) && !old.is_marked(c.addr(), segment_size);
            if dead {
                dropped += *bytes;
            }
            !dead
        });
        self.external_bytes = self.external_bytes.saturating_sub(dropped);

        self.phase = GcPhase::Sweep;
        let swept = self.old.sweep();
        stats.cells_swept = swept.freed_cells;
        self.stats.bytes_swept += swept.freed_bytes as u64;
        stats.segments_released = self.resize_old_generation();
        self.marker.end();

        stats.bytes_after = self.old.allocated_bytes();
        stats.duration = start.elapsed();
        log::debug!(
            "{}: full collection {} -> {} bytes, {} swept, {} finalized, {} weak refs cleared, {} segments released in {:?}",
            self.config.name,
            stats.bytes_before,
            stats.bytes_after,
            stats.cells_swept,
            stats.cells_finalized,
            stats.weak_refs_cleared,
            stats.segments_released,
            stats.duration
        );
        self.stats.record(&stats);
        self.last_full = Some(stats);
        self.phase = GcPhase::Idle;
        self.in_gc = false;
    }

    /// Returns surplus empty segments and grows the old generation back
    /// below the occupancy threshold.
    ///
    /// # Returns
    ///
    /// The number of segments released.
    fn resize_old_generation(&mut self) -> usize {
        let mut released = 0;
        if self.config.release_unused_segments {
            let target = self.config.full_gc_threshold * self.segment_size as f64;
            let needed = (self.old.allocated_bytes() as f64 / target).ceil() as usize;
            let keep = needed.max(self.config.min_old_segments);
            for storage in self.old.release_empty(keep) {
                log::trace!("{}: releasing old segment {:?}", self.config.name, storage);
                self.provider.delete_storage(storage);
                released += 1;
            }
        }
        while self.old_occupancy_exceeded() {
            if !grow_old(&mut self.old, &*self.provider, &self.config) {
                break;
            }
        }
        released
    }

    /// Collects weak slot reports from live weak-bearing cells and the root
    /// provider, then resolves every slot.
    ///
    /// # Returns
    ///
    /// The number of slots cleared.
    fn weak_phase(
        &mut self,
        provider: &mut Option<Box<dyn RootProvider>>,
        mode: WeakMode,
    ) -> usize {
        let segment_size = self.segment_size;
        let mut marked = Vec::new();
        {
            let mut acceptor = WeakRefAcceptor::new(&mut marked);
            let heap: &Heap = self;
            for &cell in heap.weak_cells.young.iter().chain(&heap.weak_cells.old) {
                if mode == WeakMode::Full
                    && heap.old.contains(cell.addr(), segment_size)
                    && !heap.old.is_marked(cell.addr(), segment_size)
                {
                    continue;
                }
                if let Some(mark_weak) = vtable(heap.kind_of(cell)).mark_weak {
                    mark_weak(cell, heap, &mut acceptor);
                }
            }
            if let Some(provider) = provider.as_mut() {
                provider.mark_weak_roots(&mut acceptor);
            }
        }
        self.weak_refs.mark_all(&marked);
        let young: &YoungGeneration = &self.young;
        let old = &self.old;
        let result = self
            .weak_refs
            .sweep(|target| resolve_weak(young, old, segment_size, mode, target));
        log::trace!(
            "{}: weak slots {} updated, {} cleared, {} freed",
            self.config.name,
            result.updated,
            result.cleared,
            result.freed
        );
        result.cleared
    }

    /// Runs the finalizer of a dead cell.
    pub(crate) fn finalize_cell(&mut self, cell: CellHandle) {
        // SAFETY: registered cells are intact until they are reclaimed.
        let mut header = unsafe { cell::read_header(cell.addr()) };
        if header.is_finalized() {
            invariant_violation!("{:?} ({}) finalized twice", cell, header.kind());
        }
        header.flags |= FINALIZED;
        // SAFETY: as above.
        unsafe { cell::write_header(cell.addr(), header) };
        if let Some(finalize) = vtable(header.kind()).finalize {
            finalize(cell, self);
        }
    }

    /// Finalizes every registered cell and releases every remaining native
    /// resource. Used at teardown.
    pub(crate) fn finalize_all(&mut self) {
        self.in_gc = true;
        self.phase = GcPhase::Finalize;
        self.marker.end();
        let mut cells = mem::take(&mut self.finalizable.young);
        cells.append(&mut self.finalizable.old);
        let mut finalized = 0u64;
        for cell in cells {
            // SAFETY: registered cells are intact until they are reclaimed.
            if !unsafe { cell::read_header(cell.addr()) }.is_finalized() {
                self.finalize_cell(cell);
                finalized += 1;
            }
        }
        self.stats.cells_finalized += finalized;
        let leftovers = self.natives.drain();
        let unowned = leftovers.len();
        for resource in leftovers {
            release_resource(resource, "unregistered cell");
        }
        log::debug!(
            "{}: teardown finalized {} cells, released {} unregistered natives",
            self.config.name,
            finalized,
            unowned
        );
        self.phase = GcPhase::Idle;
    }
}
