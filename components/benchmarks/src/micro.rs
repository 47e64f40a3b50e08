//! Micro-benchmarks for single heap operations
//!
//! These benchmarks isolate one allocation path or collector phase each to
//! establish baseline costs.

use crate::runner::{Benchmark, BenchmarkResult};
use core_types::layout::OBJECT_PROPERTIES;
use memory_manager::{GcKind, Heap, HeapError};

fn short_lived_objects(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    for _ in 0..n {
        heap.alloc_object(None)?;
    }
    Ok(())
}

fn short_lived_strings(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    for i in 0..n {
        heap.alloc_string(if i % 2 == 0 { "benchmark" } else { "bénchmark" })?;
    }
    Ok(())
}

fn rolling_window(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let mut window = Vec::with_capacity(256);
    for i in 0..n {
        let object = heap.alloc_object(None)?;
        if window.len() < 256 {
            window.push(heap.add_root(object));
        } else {
            heap.set_root(window[i as usize % 256], object);
        }
    }
    Ok(())
}

fn old_to_young_stores(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let holder = heap.alloc_object(None)?;
    let root = heap.add_root(holder);
    heap.collect(GcKind::Young);
    for _ in 0..n {
        let value = heap.alloc_object(None)?;
        if let Some(holder) = heap.root(root) {
            heap.set_field(holder, OBJECT_PROPERTIES, Some(value));
        }
    }
    Ok(())
}

fn large_objects(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let elements = vec![None; 20_000];
    for _ in 0..n {
        heap.alloc_array_storage(&elements)?;
    }
    Ok(())
}

fn finalizer_churn(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    for _ in 0..n {
        heap.alloc_external_ascii_string(b"external".to_vec())?;
    }
    Ok(())
}

fn weak_ref_churn(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    for _ in 0..n {
        let target = heap.alloc_object(None)?;
        heap.alloc_weak_ref(None, target)?;
    }
    Ok(())
}

fn young_collections(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    for _ in 0..n {
        for _ in 0..100 {
            let s = heap.alloc_string("survivor")?;
            heap.add_root(s);
        }
        heap.collect(GcKind::Young);
    }
    Ok(())
}

fn full_collections(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let mut elements = Vec::with_capacity(1000);
    for _ in 0..1000 {
        elements.push(Some(heap.alloc_object(None)?));
        if elements.len() % 500 == 0 {
            let storage = heap.alloc_array_storage(&elements)?;
            heap.add_root(storage);
            elements.clear();
        }
    }
    for _ in 0..n {
        heap.collect(GcKind::Full);
    }
    Ok(())
}

/// Create all micro-benchmarks
pub fn create_benchmarks() -> Vec<Benchmark> {
    vec![
        Benchmark::new(
            "alloc_short_lived_objects",
            "1M unreachable JSObjects",
            1_000_000,
            short_lived_objects,
        ),
        Benchmark::new(
            "alloc_short_lived_strings",
            "500K ASCII and UTF-16 strings",
            500_000,
            short_lived_strings,
        ),
        Benchmark::new(
            "promotion_rolling_window",
            "500K objects through 256 rooted slots",
            500_000,
            rolling_window,
        ),
        Benchmark::new(
            "write_barrier_old_to_young",
            "500K stores of young objects into an old holder",
            500_000,
            old_to_young_stores,
        ),
        Benchmark::new(
            "alloc_large_objects",
            "2K storages allocated directly in the old generation",
            2_000,
            large_objects,
        ),
        Benchmark::new(
            "finalizer_churn",
            "200K external strings finalized young",
            200_000,
            finalizer_churn,
        ),
        Benchmark::new(
            "weak_ref_churn",
            "200K weak ref objects and targets",
            200_000,
            weak_ref_churn,
        ),
        Benchmark::new(
            "young_collection",
            "200 young collections promoting 100 strings each",
            200,
            young_collections,
        ),
        Benchmark::new(
            "full_collection",
            "100 full collections over 1000 live objects",
            100,
            full_collections,
        ),
    ]
}

/// Run all micro-benchmarks once each
pub fn run_all() -> Vec<BenchmarkResult> {
    create_benchmarks().iter().map(Benchmark::run).collect()
}
