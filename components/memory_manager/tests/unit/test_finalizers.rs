//! Finalization of native resources owned by cells

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use memory_manager::{FinalizerError, GcConfig, GcKind, Heap, NativeResource};
use storage_provider::MallocStorageProvider;

fn heap() -> Heap {
    let provider = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
    Heap::new(GcConfig::default(), provider).unwrap()
}

/// Counts its own releases.
struct Counted(Rc<Cell<usize>>);

impl NativeResource for Counted {
    fn release(self: Box<Self>) -> Result<(), FinalizerError> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

struct Failing;

impl NativeResource for Failing {
    fn release(self: Box<Self>) -> Result<(), FinalizerError> {
        Err(FinalizerError::new("socket", "already closed"))
    }
}

struct Panicking;

impl NativeResource for Panicking {
    fn release(self: Box<Self>) -> Result<(), FinalizerError> {
        panic!("release blew up")
    }
}

#[test]
fn test_thousand_dead_cells_finalized_exactly_once() {
    let mut heap = heap();
    let released = Rc::new(Cell::new(0));
    for _ in 0..1000 {
        heap.alloc_host_object(None, Counted(released.clone()))
            .unwrap();
    }
    assert_eq!(heap.info().native_resources, 1000);

    heap.collect(GcKind::Full);
    assert_eq!(released.get(), 1000);
    assert_eq!(heap.cumulative_stats().cells_finalized, 1000);
    assert_eq!(heap.info().native_resources, 0);

    heap.collect(GcKind::Full);
    assert_eq!(released.get(), 1000);
}

#[test]
fn test_dead_old_cells_are_finalized() {
    let mut heap = heap();
    let released = Rc::new(Cell::new(0));
    let mut roots = Vec::new();
    for _ in 0..10 {
        let host = heap
            .alloc_host_object(None, Counted(released.clone()))
            .unwrap();
        roots.push(heap.add_root(host));
    }
    heap.collect(GcKind::Young);
    assert_eq!(released.get(), 0);

    for id in roots.drain(..5) {
        heap.remove_root(id);
    }
    heap.collect(GcKind::Full);
    assert_eq!(released.get(), 5);
    assert_eq!(heap.debug_info().last_full.unwrap().cells_finalized, 5);
    for id in roots {
        let host = heap.root(id).unwrap();
        assert!(heap.host_resource::<Counted>(host).is_some());
    }
}

#[test]
fn test_reachable_finalizable_cells_keep_their_contents() {
    let mut heap = heap();
    let s = heap
        .alloc_external_ascii_string(b"external chars".to_vec())
        .unwrap();
    let id = heap.add_root(s);
    heap.collect(GcKind::Young);
    heap.collect(GcKind::Full);

    let s = heap.root(id).unwrap();
    assert_eq!(heap.string_contents(s), "external chars");
    assert_eq!(heap.cumulative_stats().cells_finalized, 0);
    assert!(heap.info().malloc_size_estimate >= 14);
}

#[test]
fn test_finalizer_errors_and_panics_are_swallowed() {
    let mut heap = heap();
    heap.alloc_host_object(None, Failing).unwrap();
    heap.alloc_host_object(None, Panicking).unwrap();
    heap.collect(GcKind::Young);

    let stats = heap.cumulative_stats();
    assert_eq!(stats.cells_finalized, 2);
    assert_eq!(stats.finalizer_failures, 2);

    let s = heap.alloc_string("still usable").unwrap();
    assert_eq!(heap.string_contents(s), "still usable");
}

#[test]
fn test_drop_runs_pending_finalizers() {
    let released = Rc::new(Cell::new(0));
    {
        let mut heap = heap();
        for i in 0..6 {
            let host = heap
                .alloc_host_object(None, Counted(released.clone()))
                .unwrap();
            if i % 2 == 0 {
                heap.add_root(host);
            }
        }
        heap.collect(GcKind::Young);
        assert_eq!(released.get(), 3);
    }
    assert_eq!(released.get(), 6);
}

#[test]
fn test_teardown_releases_live_resources() {
    let released = Rc::new(Cell::new(0));
    {
        let mut heap = heap();
        let host = heap
            .alloc_host_object(None, Counted(released.clone()))
            .unwrap();
        heap.add_root(host);
        heap.collect(GcKind::Full);
    }
    assert_eq!(released.get(), 1);
}
