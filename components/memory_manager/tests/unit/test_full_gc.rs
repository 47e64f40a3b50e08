//! Old generation mark/sweep, segment accounting and out-of-memory

use std::sync::Arc;

use core_types::layout::OBJECT_PROPERTIES;
use memory_manager::{CellKind, GcConfig, GcKind, Generation, Heap, RootId};
use storage_provider::{CountingStorageProvider, LimitedStorageProvider, MallocStorageProvider};

const SEGMENT: usize = 1 << 16;
/// Elements of an ArrayStorage large enough to bypass the young generation.
const LARGE: usize = 1100;

fn heap(config: GcConfig) -> Heap {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider = Arc::new(MallocStorageProvider::new(SEGMENT).unwrap());
    Heap::new(config, provider).unwrap()
}

fn kind_count(heap: &Heap, kind: CellKind) -> usize {
    heap.debug_info()
        .kinds
        .iter()
        .find(|k| k.kind == kind)
        .map_or(0, |k| k.cells)
}

#[test]
fn test_large_allocations_bypass_young_generation() {
    let mut heap = heap(GcConfig::default());
    let large = heap.alloc_array_storage(&vec![None; LARGE]).unwrap();
    assert_eq!(heap.generation_of(large), Some(Generation::Old));
    assert_eq!(heap.info().young_allocated_bytes, 0);
}

#[test]
fn test_unreachable_old_cells_are_swept() {
    let mut heap = heap(GcConfig::default());
    for _ in 0..5 {
        heap.alloc_array_storage(&vec![None; LARGE]).unwrap();
    }
    assert!(heap.info().old_allocated_bytes > 5 * LARGE * 8);
    heap.collect(GcKind::Full);

    let info = heap.debug_info();
    assert_eq!(info.info.old_allocated_bytes, 0);
    assert_eq!(info.last_full.unwrap().cells_swept, 5);
}

#[test]
fn test_cycles_are_collected() {
    let mut heap = heap(GcConfig::default());
    let a = heap.alloc_object(None).unwrap();
    let b = heap.alloc_object(Some(a)).unwrap();
    heap.set_field(a, OBJECT_PROPERTIES, Some(b));
    let id = heap.add_root(a);
    heap.collect(GcKind::Young);
    assert_eq!(kind_count(&heap, CellKind::JSObject), 2);

    heap.remove_root(id);
    heap.collect(GcKind::Full);
    assert_eq!(kind_count(&heap, CellKind::JSObject), 0);
}

#[test]
fn test_back_to_back_full_collections_are_idempotent() {
    let mut heap = heap(GcConfig::default());
    let mut roots: Vec<RootId> = Vec::new();
    for i in 0..50 {
        let s = heap.alloc_string(&format!("live {}", i)).unwrap();
        roots.push(heap.add_root(s));
    }
    let host = heap.alloc_error(None, vec!["frame".to_string()]).unwrap();
    let host_root = heap.add_root(host);
    heap.collect(GcKind::Full);

    let before: Vec<_> = roots.iter().map(|&id| heap.root(id).unwrap()).collect();
    let finalized = heap.cumulative_stats().cells_finalized;
    heap.collect(GcKind::Full);
    heap.collect(GcKind::Full);
    let after: Vec<_> = roots.iter().map(|&id| heap.root(id).unwrap()).collect();

    assert_eq!(before, after);
    assert_eq!(heap.cumulative_stats().cells_finalized, finalized);
    for (i, &s) in after.iter().enumerate() {
        assert_eq!(heap.string_contents(s), format!("live {}", i));
    }
    let host = heap.root(host_root).unwrap();
    assert_eq!(heap.error_stack_trace(host).unwrap(), ["frame".to_string()]);
}

#[test]
fn test_freed_space_is_reused() {
    let mut heap = heap(GcConfig::default().with_old_segments(1, 1));
    for _ in 0..20 {
        heap.alloc_array_storage(&vec![None; LARGE]).unwrap();
    }
    assert_eq!(heap.segment_counts().old, 1);
    assert!(heap.cumulative_stats().full_collections > 0);
}

#[test]
fn test_empty_segments_are_returned_after_sweep() {
    let counting = Arc::new(CountingStorageProvider::new(Arc::new(
        MallocStorageProvider::new(SEGMENT).unwrap(),
    )));
    let mut heap = Heap::new(GcConfig::default(), counting.clone()).unwrap();
    let mut roots = Vec::new();
    for _ in 0..20 {
        let large = heap.alloc_array_storage(&vec![None; LARGE]).unwrap();
        roots.push(heap.add_root(large));
    }
    assert!(heap.segment_counts().old >= 3);
    assert_eq!(counting.num_live(), heap.info().segments);

    for id in roots {
        heap.remove_root(id);
    }
    heap.collect(GcKind::Full);
    assert_eq!(heap.segment_counts().old, 1);
    assert_eq!(counting.num_live(), heap.info().segments);
    assert!(heap.debug_info().last_full.unwrap().segments_released >= 2);
}

#[test]
fn test_low_memory_signal_releases_segments() {
    let config = GcConfig::default().with_release_unused_segments(false);
    let mut heap = heap(config);
    let mut roots = Vec::new();
    for _ in 0..20 {
        let large = heap.alloc_array_storage(&vec![None; LARGE]).unwrap();
        roots.push(heap.add_root(large));
    }
    for id in roots {
        heap.remove_root(id);
    }
    heap.collect(GcKind::Full);
    assert!(heap.segment_counts().old >= 3);

    heap.on_low_memory();
    assert_eq!(heap.segment_counts().old, 1);
}

#[test]
fn test_out_of_memory_on_provider_ceiling() {
    let counting = Arc::new(CountingStorageProvider::new(Arc::new(
        LimitedStorageProvider::with_segment_limit(
            Arc::new(MallocStorageProvider::new(SEGMENT).unwrap()),
            4,
        ),
    )));
    let mut heap = Heap::new(GcConfig::default(), counting.clone()).unwrap();
    let mut roots = Vec::new();
    let mut failure = None;
    for _ in 0..100 {
        match heap.alloc_array_storage(&vec![None; LARGE]) {
            Ok(large) => roots.push(heap.add_root(large)),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    let err = failure.expect("ceiling never reached");
    assert!(err.is_out_of_memory());
    assert!(roots.len() >= 7);
    assert_eq!(counting.num_live(), 4);
    assert!(counting.num_failed() > 0);

    for id in roots {
        heap.remove_root(id);
    }
    heap.collect(GcKind::Full);
    heap.alloc_array_storage(&vec![None; LARGE]).unwrap();
    assert_eq!(counting.num_live(), heap.info().segments);
}

#[test]
fn test_oversized_typed_constructor_is_capacity_error() {
    let mut heap = heap(GcConfig::default());
    let err = heap.alloc_array_storage(&vec![None; SEGMENT]).unwrap_err();
    assert!(!err.is_out_of_memory());
    assert!(heap.dump_segments().contains("old/0"));
}
