//! Counter invariants of the counting provider

use std::sync::Arc;

use proptest::prelude::*;
use storage_provider::{
    CountingStorageProvider, LimitedStorageProvider, MallocStorageProvider, StorageProvider,
};

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Allocate), any::<usize>().prop_map(Op::Delete)]
}

proptest! {
    #[test]
    fn prop_allocated_minus_deleted_is_live(ops in prop::collection::vec(op(), 0..64)) {
        let malloc = Arc::new(MallocStorageProvider::new(4096).unwrap());
        let limited = Arc::new(LimitedStorageProvider::with_segment_limit(malloc, 5));
        let provider = CountingStorageProvider::new(limited);
        let mut held = Vec::new();

        for op in ops {
            match op {
                Op::Allocate => {
                    if let Ok(storage) = provider.new_storage(None) {
                        held.push(storage);
                    }
                }
                Op::Delete(i) => {
                    if !held.is_empty() {
                        let storage = held.swap_remove(i % held.len());
                        provider.delete_storage(storage);
                    }
                }
            }
            let c = provider.counters();
            prop_assert_eq!(c.num_allocated - c.num_deleted, c.num_live);
            prop_assert_eq!(c.num_live, held.len());
            prop_assert!(c.num_live <= 5);
        }

        for storage in held.drain(..) {
            provider.delete_storage(storage);
        }
        prop_assert_eq!(provider.num_live(), 0);
    }
}
