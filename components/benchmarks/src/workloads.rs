//! Mixed workloads that resemble a running program
//!
//! Each workload keeps a live set that changes shape over time so that both
//! generations, the write barrier and finalization all take part.

use crate::runner::{Benchmark, BenchmarkSuite};
use memory_manager::{
    Domain, GcConfig, Heap, HeapError, IncrementalConfig, RootId, RuntimeModule,
};

/// Linear congruential generator; deterministic across runs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

const CACHE_SLOTS: usize = 1024;

fn string_cache(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let storage = heap.alloc_array_storage(&vec![None; CACHE_SLOTS])?;
    let root = heap.add_root(storage);
    let mut rng = Lcg(7);
    for i in 0..n {
        let value = heap.alloc_string(&format!("cached value {}", i))?;
        let Some(storage) = heap.root(root) else {
            break;
        };
        let slot = rng.next() as usize % CACHE_SLOTS;
        heap.array_set(storage, slot, Some(value));
    }
    Ok(())
}

fn linked_lists(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let head = heap.alloc_object(None)?;
    let root = heap.add_root(head);
    let mut rng = Lcg(11);
    for _ in 0..n {
        let parent = heap.root(root);
        let node = heap.alloc_object(parent)?;
        if rng.next() % 2048 == 0 {
            let fresh = heap.alloc_object(None)?;
            heap.set_root(root, fresh);
        } else {
            heap.set_root(root, node);
        }
    }
    Ok(())
}

fn module_loading(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let mut kept: Vec<RootId> = Vec::new();
    for i in 0..n {
        let domain = Domain::create(heap)?;
        for m in 0..3 {
            let id = (i * 3 + m) as u32;
            let module = RuntimeModule::new(id, format!("module{}.js", id), vec![0; 256]);
            Domain::add_module(heap, domain, module);
        }
        if i % 4 == 0 {
            if kept.len() < 16 {
                kept.push(heap.add_root(domain));
            } else {
                heap.set_root(kept[(i / 4) as usize % 16], domain);
            }
        }
    }
    Ok(())
}

fn incremental_churn(heap: &mut Heap, n: u64) -> Result<(), HeapError> {
    let mut live = Vec::with_capacity(100);
    for _ in 0..50 {
        for _ in 0..100 {
            live.push(Some(heap.alloc_object(None)?));
        }
        let storage = heap.alloc_array_storage(&live)?;
        heap.add_root(storage);
        live.clear();
    }
    let holders = heap.alloc_array_storage(&vec![None; 256])?;
    let root = heap.add_root(holders);
    for i in 0..n {
        let value = heap.alloc_string("churn")?;
        if i % 16 == 0 {
            if let Some(holders) = heap.root(root) {
                heap.array_set(holders, (i / 16) as usize % 256, Some(value));
            }
        }
    }
    Ok(())
}

/// Create the workload suite
pub fn create_suite() -> BenchmarkSuite {
    let mut suite = BenchmarkSuite::new("Workloads".to_string());
    suite.add(Benchmark::new(
        "string_cache",
        "200K strings replacing entries of a 1024-slot cache",
        200_000,
        string_cache,
    ));
    suite.add(Benchmark::new(
        "linked_lists",
        "500K list nodes, lists dropped at random",
        500_000,
        linked_lists,
    ));
    suite.add(Benchmark::new(
        "module_loading",
        "20K domains of 3 modules, one in four kept alive",
        20_000,
        module_loading,
    ));
    suite.add(
        Benchmark::new(
            "incremental_churn",
            "500K strings over a 5000-object live set, incremental marking",
            500_000,
            incremental_churn,
        )
        .with_config(GcConfig::default().with_incremental(IncrementalConfig {
            enabled: true,
            max_cells_per_slice: 256,
            ..Default::default()
        })),
    );
    suite
}
