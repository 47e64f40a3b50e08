//! Weak reference slots and the root provider interface

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use memory_manager::{
    CellHandle, GcConfig, GcKind, Heap, RootAcceptor, RootProvider, WeakRef, WeakRefAcceptor,
};
use storage_provider::MallocStorageProvider;

fn heap() -> Heap {
    let provider = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
    Heap::new(GcConfig::default(), provider).unwrap()
}

/// Execution state as the interpreter would expose it.
#[derive(Default)]
struct Frames {
    registers: Vec<CellHandle>,
    weak: Vec<WeakRef>,
}

struct FrameRoots(Rc<RefCell<Frames>>);

impl RootProvider for FrameRoots {
    fn mark_roots(&mut self, acceptor: &mut dyn RootAcceptor) {
        for register in self.0.borrow_mut().registers.iter_mut() {
            acceptor.accept(register);
        }
    }

    fn mark_weak_roots(&mut self, acceptor: &mut WeakRefAcceptor<'_>) {
        for weak in &self.0.borrow().weak {
            acceptor.accept(weak);
        }
    }
}

fn heap_with_frames() -> (Heap, Rc<RefCell<Frames>>) {
    let mut heap = heap();
    let frames = Rc::new(RefCell::new(Frames::default()));
    assert!(heap
        .set_root_provider(Box::new(FrameRoots(frames.clone())))
        .is_none());
    (heap, frames)
}

#[test]
fn test_strongly_reachable_target_is_not_cleared() {
    let (mut heap, frames) = heap_with_frames();
    let target = heap.alloc_string("target").unwrap();
    let weak = heap.create_weak(target);
    {
        let mut frames = frames.borrow_mut();
        frames.registers.push(target);
        frames.weak.push(weak);
    }

    heap.collect(GcKind::Young);
    let moved = frames.borrow().registers[0];
    assert_ne!(moved, target);
    assert_eq!(heap.get_weak(&frames.borrow().weak[0]), Some(moved));

    heap.collect(GcKind::Full);
    assert_eq!(heap.get_weak(&frames.borrow().weak[0]), Some(moved));
    assert_eq!(heap.string_contents(moved), "target");
}

#[test]
fn test_weakly_reachable_target_is_cleared() {
    let (mut heap, frames) = heap_with_frames();
    let young = heap.alloc_object(None).unwrap();
    let weak_young = heap.create_weak(young);
    frames.borrow_mut().weak.push(weak_young);
    let old = heap.alloc_object(None).unwrap();
    frames.borrow_mut().registers.push(old);

    heap.collect(GcKind::Young);
    assert_eq!(heap.get_weak(&frames.borrow().weak[0]), None);

    let old = frames.borrow_mut().registers.pop().unwrap();
    let weak_old = heap.create_weak(old);
    frames.borrow_mut().weak.push(weak_old);
    heap.collect(GcKind::Young);
    assert_eq!(heap.get_weak(&frames.borrow().weak[1]), Some(old));

    heap.collect(GcKind::Full);
    assert_eq!(heap.get_weak(&frames.borrow().weak[1]), None);
    assert_eq!(heap.cumulative_stats().weak_refs_cleared, 2);
}

#[test]
fn test_unreported_weak_slots_are_freed() {
    let (mut heap, frames) = heap_with_frames();
    let target = heap.alloc_object(None).unwrap();
    frames.borrow_mut().registers.push(target);
    let weak = heap.create_weak(target);
    assert_eq!(heap.info().weak_refs, 1);

    heap.collect(GcKind::Young);
    assert_eq!(heap.get_weak(&weak), None);
    assert_eq!(heap.info().weak_refs, 0);
}

#[test]
fn test_freed_weak_slot_is_not_resolved_through_old_reference() {
    let (mut heap, frames) = heap_with_frames();
    let first = heap.alloc_object(None).unwrap();
    let second = heap.alloc_object(None).unwrap();
    frames.borrow_mut().registers.extend([first, second]);
    let stale = heap.create_weak(first);
    heap.collect(GcKind::Young);
    assert_eq!(heap.info().weak_refs, 0);

    let second = frames.borrow().registers[1];
    let fresh = heap.create_weak(second);
    assert_eq!(fresh.index(), stale.index());
    assert_eq!(heap.get_weak(&stale), None);
    assert_eq!(heap.get_weak(&fresh), Some(second));
}

#[test]
fn test_removed_root_id_stays_removed() {
    let mut heap = heap();
    let first = heap.alloc_object(None).unwrap();
    let stale = heap.add_root(first);
    heap.remove_root(stale);
    let second = heap.alloc_object(None).unwrap();
    let fresh = heap.add_root(second);
    assert_eq!(fresh.index(), stale.index());
    assert_eq!(heap.root(stale), None);
    assert_eq!(heap.remove_root(stale), None);
    assert_eq!(heap.root(fresh), Some(second));
}

#[test]
fn test_weak_ref_object_clears_when_target_dies_young() {
    let mut heap = heap();
    let target = heap.alloc_object(None).unwrap();
    let weak = heap.alloc_weak_ref(None, target).unwrap();
    let id = heap.add_root(weak);
    heap.collect(GcKind::Young);

    let weak = heap.root(id).unwrap();
    assert_eq!(heap.weak_ref_target(weak), None);
    assert_eq!(heap.info().weak_refs, 1);
}

#[test]
fn test_dead_weak_ref_object_frees_its_slot() {
    let mut heap = heap();
    let target = heap.alloc_object(None).unwrap();
    let id = heap.add_root(target);
    heap.alloc_weak_ref(None, target).unwrap();
    assert_eq!(heap.info().weak_refs, 1);

    heap.collect(GcKind::Young);
    assert_eq!(heap.info().weak_refs, 0);
    assert!(heap.root(id).is_some());
}

#[test]
fn test_root_provider_can_be_replaced() {
    let (mut heap, _frames) = heap_with_frames();
    assert!(heap.take_root_provider().is_some());
    assert!(heap.take_root_provider().is_none());
}
