//! Incremental old-generation marking

use std::sync::Arc;

use core_types::layout::OBJECT_PARENT;
use memory_manager::{
    CellKind, Domain, GcConfig, GcKind, GcPhase, Heap, IncrementalConfig, RuntimeModule,
};
use storage_provider::MallocStorageProvider;

fn incremental_heap() -> Heap {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
    let config = GcConfig::default().with_incremental(IncrementalConfig {
        enabled: true,
        max_cells_per_slice: 1,
        ..Default::default()
    });
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
fn test_incremental_cycle_reclaims_garbage() {
    let mut heap = incremental_heap();
    let live: Vec<_> = (0..20)
        .map(|_| heap.alloc_object(None).map(Some))
        .collect::<Result<_, _>>()
        .unwrap();
    let storage = heap.alloc_array_storage(&live).unwrap();
    heap.add_root(storage);
    let garbage: Vec<_> = (0..10)
        .map(|_| heap.alloc_object(None).map(Some))
        .collect::<Result<_, _>>()
        .unwrap();
    let garbage = heap.alloc_array_storage(&garbage).unwrap();
    let garbage_root = heap.add_root(garbage);
    heap.collect(GcKind::Full);
    assert_eq!(kind_count(&heap, CellKind::JSObject), 30);

    heap.remove_root(garbage_root);
    assert!(heap.start_incremental_collection());
    assert!(!heap.start_incremental_collection());
    assert!(heap.is_marking());
    assert_eq!(heap.phase(), GcPhase::Mark);

    let mut steps = 0;
    while !heap.incremental_step() {
        steps += 1;
        assert!(steps < 1000, "marking never converged");
    }
    assert!(steps > 1);
    assert!(heap.is_marking());

    heap.finish_incremental_collection();
    assert!(!heap.is_marking());
    assert_eq!(heap.phase(), GcPhase::Idle);
    assert_eq!(kind_count(&heap, CellKind::JSObject), 20);
    let stats = heap.cumulative_stats();
    assert_eq!(stats.incremental.cycles, 1);
    assert!(stats.incremental.slices > 1);
    assert_eq!(stats.full_collections, 2);
}

#[test]
fn test_overwritten_reference_survives_marking() {
    let mut heap = incremental_heap();
    let precious = heap.alloc_string("precious").unwrap();
    let holder = heap.alloc_array_storage(&[Some(precious)]).unwrap();
    let id = heap.add_root(holder);
    heap.collect(GcKind::Full);
    let holder = heap.root(id).unwrap();
    let precious = heap.array_get(holder, 0).unwrap();

    assert!(heap.start_incremental_collection());
    // Allocated black while marking.
    let late = heap.alloc_array_storage(&vec![None; 1100]).unwrap();
    heap.add_root(late);
    heap.array_set(late, 0, Some(precious));
    heap.array_set(holder, 0, None);

    heap.finish_incremental_collection();
    let kept = heap.array_get(late, 0).unwrap();
    assert_eq!(kept, precious);
    assert_eq!(heap.string_contents(kept), "precious");
    assert!(heap.cumulative_stats().incremental.barrier_records >= 1);
}

#[test]
fn test_allocation_completes_marking() {
    let mut heap = incremental_heap();
    assert!(heap.start_incremental_collection());
    for _ in 0..5000 {
        heap.alloc_object(None).unwrap();
    }
    assert!(!heap.is_marking());
    assert_eq!(heap.cumulative_stats().full_collections, 1);
}

#[test]
fn test_young_collection_request_finishes_marking() {
    let mut heap = incremental_heap();
    let s = heap.alloc_string("kept").unwrap();
    let id = heap.add_root(s);
    assert!(heap.start_incremental_collection());
    heap.collect(GcKind::Young);
    assert!(!heap.is_marking());

    let s = heap.root(id).unwrap();
    assert_eq!(heap.string_contents(s), "kept");
}

fn drain_marking(heap: &mut Heap) {
    let mut steps = 0;
    while !heap.incremental_step() {
        steps += 1;
        assert!(steps < 1000, "marking never converged");
    }
}

#[test]
fn test_weak_ref_target_read_during_marking_survives() {
    let mut heap = incremental_heap();
    let holder = heap.alloc_object(None).unwrap();
    let holder_id = heap.add_root(holder);
    let parent = heap.alloc_object(None).unwrap();
    let parent_id = heap.add_root(parent);
    let weak = heap.alloc_weak_ref(None, parent).unwrap();
    let weak_id = heap.add_root(weak);
    heap.collect(GcKind::Full);
    let holder = heap.root(holder_id).unwrap();
    let parent = heap.root(parent_id).unwrap();
    let weak = heap.root(weak_id).unwrap();
    heap.remove_root(parent_id);

    assert!(heap.start_incremental_collection());
    drain_marking(&mut heap);
    // The holder is black; only the weak read can keep the target alive.
    let target = heap.weak_ref_target(weak);
    assert_eq!(target, Some(parent));
    heap.set_field(holder, OBJECT_PARENT, target);
    heap.finish_incremental_collection();

    assert_eq!(heap.weak_ref_target(weak), Some(parent));
    assert_eq!(heap.get_field(holder, OBJECT_PARENT), Some(parent));
    assert_eq!(heap.kind_of(parent), CellKind::JSObject);
    assert!(heap.cumulative_stats().incremental.weak_read_records >= 1);
}

#[test]
fn test_unread_weak_ref_target_dies_during_marking() {
    let mut heap = incremental_heap();
    let parent = heap.alloc_object(None).unwrap();
    let parent_id = heap.add_root(parent);
    let weak = heap.alloc_weak_ref(None, parent).unwrap();
    let weak_id = heap.add_root(weak);
    heap.collect(GcKind::Full);
    let weak = heap.root(weak_id).unwrap();
    heap.remove_root(parent_id);

    assert!(heap.start_incremental_collection());
    drain_marking(&mut heap);
    heap.finish_incremental_collection();

    assert_eq!(heap.weak_ref_target(weak), None);
    assert_eq!(heap.cumulative_stats().incremental.weak_read_records, 0);
}

#[test]
fn test_module_domain_read_during_marking_survives() {
    let mut heap = incremental_heap();
    let holder = heap.alloc_object(None).unwrap();
    let holder_id = heap.add_root(holder);
    let domain = Domain::create(&mut heap).unwrap();
    let domain_id = heap.add_root(domain);
    for i in 0..2 {
        let module = RuntimeModule::new(i, format!("module{}.js", i), vec![0; 8]);
        Domain::add_module(&mut heap, domain, module);
    }
    heap.collect(GcKind::Full);
    let holder = heap.root(holder_id).unwrap();
    let domain = heap.root(domain_id).unwrap();
    heap.remove_root(domain_id);

    assert!(heap.start_incremental_collection());
    drain_marking(&mut heap);
    let owner = Domain::with_modules(&heap, domain, |modules| modules[0].domain(&heap));
    assert_eq!(owner, Some(domain));
    heap.set_field(holder, OBJECT_PARENT, owner);
    heap.finish_incremental_collection();

    assert_eq!(heap.kind_of(domain), CellKind::Domain);
    assert_eq!(Domain::module_count(&heap, domain), 2);
    Domain::with_modules(&heap, domain, |modules| {
        for module in modules {
            assert_eq!(module.domain(&heap), Some(domain));
        }
    });
    assert_eq!(heap.info().weak_refs, 2);
}
