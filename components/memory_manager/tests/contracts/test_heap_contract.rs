//! Contract tests for the public heap API

use std::sync::Arc;

use memory_manager::{
    CellKind, ConfigError, GcConfig, GcKind, GcPhase, HasFinalizer, Heap, HeapError,
    IncrementalConfig,
};
use storage_provider::{
    CountingStorageProvider, LimitedStorageProvider, MallocStorageProvider, StorageProvider,
};

fn provider() -> Arc<dyn StorageProvider> {
    Arc::new(MallocStorageProvider::new(1 << 16).unwrap())
}

#[test]
fn contract_default_config() {
    let config = GcConfig::default();
    assert_eq!(config.promotion_age, 1);
    assert_eq!(config.min_old_segments, 1);
    assert_eq!(config.max_old_segments, 0);
    assert!(config.full_gc_threshold > 0.0 && config.full_gc_threshold <= 1.0);
    assert!(!config.incremental.enabled);
    assert!(config.release_unused_segments);
}

#[test]
fn contract_new_heap_is_idle_and_empty() {
    let heap = Heap::new(GcConfig::default(), provider()).unwrap();
    assert_eq!(heap.phase(), GcPhase::Idle);
    assert_eq!(heap.segment_size(), 1 << 16);
    assert!(!heap.is_marking());

    let info = heap.info();
    assert_eq!(info.segments, 3);
    assert_eq!(info.allocated_bytes, 0);
    assert_eq!(info.roots, 0);
    assert_eq!(info.young_collections, 0);
    assert_eq!(info.full_collections, 0);
}

#[test]
fn contract_invalid_config_is_rejected() {
    let config = GcConfig::default().with_full_gc_threshold(2.0);
    let err = Heap::new(config, provider()).unwrap_err();
    assert!(matches!(
        err,
        HeapError::Config(ConfigError::FullGcThreshold(_))
    ));

    let config = GcConfig::default().with_incremental(IncrementalConfig {
        enabled: true,
        max_cells_per_slice: 0,
        ..Default::default()
    });
    assert!(matches!(
        Heap::new(config, provider()),
        Err(HeapError::Config(ConfigError::EmptySlice))
    ));
}

#[test]
fn contract_provider_failure_is_storage_error() {
    let limited = Arc::new(LimitedStorageProvider::with_segment_limit(provider(), 1));
    let err = Heap::new(GcConfig::default(), limited).unwrap_err();
    assert!(matches!(err, HeapError::Storage(_)));
    assert!(!err.is_out_of_memory());
}

#[test]
fn contract_provider_shared_between_heaps() {
    let counting = Arc::new(CountingStorageProvider::new(provider()));
    let mut a = Heap::new(GcConfig::default().with_name("a"), counting.clone()).unwrap();
    let mut b = Heap::new(GcConfig::default().with_name("b"), counting.clone()).unwrap();
    assert_eq!(counting.num_live(), 6);

    let sa = a.alloc_string("from a").unwrap();
    let sb = b.alloc_string("from b").unwrap();
    assert_eq!(a.string_contents(sa), "from a");
    assert_eq!(b.string_contents(sb), "from b");
    assert!(a.dump_segments().contains("young/active"));

    drop(a);
    assert_eq!(counting.num_live(), 3);
    drop(b);
    assert_eq!(counting.num_live(), 0);
}

#[test]
fn contract_raw_allocation() {
    let mut heap = Heap::with_default_provider(GcConfig::default(), 1 << 16).unwrap();
    let cell = heap.allocate(CellKind::JSObject, 0, HasFinalizer::No).unwrap();
    assert_eq!(heap.kind_of(cell), CellKind::JSObject);
    assert_eq!(heap.size_of(cell), CellKind::JSObject.metadata().min_size());
    assert!(heap.is_young(cell));
    assert_eq!(heap.malloc_size_of(cell), 0);

    heap.allocate(CellKind::ExternalAsciiString, 0, HasFinalizer::Yes)
        .unwrap();
    assert_eq!(heap.debug_info().finalizable_cells, 1);
    heap.collect(GcKind::Young);
    assert_eq!(heap.cumulative_stats().cells_finalized, 1);
}

#[test]
fn contract_out_of_memory_error() {
    let mut heap = Heap::new(GcConfig::default(), provider()).unwrap();
    let err = heap
        .allocate(CellKind::ArrayStorage, 1 << 17, HasFinalizer::No)
        .unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(err.to_string().starts_with("out of memory"));
}

#[test]
fn contract_heap_is_debug() {
    let heap = Heap::new(GcConfig::default().with_name("debugged"), provider()).unwrap();
    assert!(format!("{:?}", heap).contains("debugged"));
}
