//! Per-kind behaviour hooks.
//!
//! Layout lives in [`core_types::Metadata`]; behaviour lives here. A kind's
//! finalizer runs once when a dead cell registered with
//! [`HasFinalizer::Yes`](crate::HasFinalizer::Yes) is reclaimed. Its weak
//! hook reports the weak slots held by a live cell. Its malloc-size hook
//! estimates the off-heap bytes the cell keeps alive.

use core_types::layout::WEAK_REF_SLOT;
use core_types::CellKind;

use crate::cell::{self, CellHandle};
use crate::domain::Domain;
use crate::heap::Heap;
use crate::weak_ref::{WeakRef, WeakRefAcceptor};

/// Finalizer of a dead cell.
pub type FinalizeFn = fn(CellHandle, &mut Heap);
/// Reports the weak slots of a live cell.
pub type MarkWeakFn = fn(CellHandle, &Heap, &mut WeakRefAcceptor<'_>);
/// Off-heap bytes kept alive by a cell.
pub type MallocSizeFn = fn(CellHandle, &Heap) -> usize;

/// Behaviour hooks of one kind.
#[derive(Clone, Copy)]
pub struct VTable {
    /// Runs when a registered cell dies
    pub finalize: Option<FinalizeFn>,
    /// Reports weak slots during weak marking
    pub mark_weak: Option<MarkWeakFn>,
    /// Estimates malloc'd bytes
    pub malloc_size: Option<MallocSizeFn>,
}

static PLAIN: VTable = VTable {
    finalize: None,
    mark_weak: None,
    malloc_size: None,
};

static NATIVE: VTable = VTable {
    finalize: Some(finalize_native),
    mark_weak: None,
    malloc_size: Some(native_malloc_size),
};

static DOMAIN: VTable = VTable {
    finalize: Some(finalize_native),
    mark_weak: Some(Domain::mark_weak_refs),
    malloc_size: Some(native_malloc_size),
};

static WEAK_REF: VTable = VTable {
    finalize: None,
    mark_weak: Some(mark_weak_ref_cell),
    malloc_size: None,
};

/// Hooks for `kind`.
pub fn vtable(kind: CellKind) -> &'static VTable {
    match kind {
        CellKind::ExternalAsciiString
        | CellKind::ExternalUtf16String
        | CellKind::JSError
        | CellKind::JSArrayBuffer
        | CellKind::HostObject => &NATIVE,
        CellKind::Domain => &DOMAIN,
        CellKind::JSWeakRef => &WEAK_REF,
        _ => &PLAIN,
    }
}

/// Releases the resource in the cell's native slot.
fn finalize_native(cell: CellHandle, heap: &mut Heap) {
    let kind = heap.kind_of(cell);
    if let Some(resource) = heap.take_native(cell) {
        if !crate::native::release_resource(resource, kind.name()) {
            heap.stats.finalizer_failures += 1;
        }
    }
}

fn native_malloc_size(cell: CellHandle, heap: &Heap) -> usize {
    heap.native(cell).map_or(0, |r| r.malloc_size())
}

/// Reports the slot of a `JSWeakRef` cell.
fn mark_weak_ref_cell(cell: CellHandle, _heap: &Heap, acceptor: &mut WeakRefAcceptor<'_>) {
    // SAFETY: weak hooks only run on live cells of the right kind.
    let stored = unsafe { cell::read_word(cell.payload(WEAK_REF_SLOT)) };
    if let Some(weak) = WeakRef::from_word(stored) {
        acceptor.accept(&weak);
    }
}
