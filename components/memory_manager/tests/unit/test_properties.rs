//! Randomized operation sequences against a model of the rooted set

use std::sync::Arc;

use memory_manager::{GcConfig, GcKind, Heap, RootId};
use proptest::prelude::*;
use storage_provider::{CountingStorageProvider, MallocStorageProvider};

#[derive(Debug, Clone)]
enum Op {
    RootedString(String),
    Garbage(usize),
    Unroot(usize),
    Large,
    Collect(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => "[a-z0-9 ]{0,24}".prop_map(Op::RootedString),
        3 => (0usize..200).prop_map(Op::Garbage),
        2 => any::<usize>().prop_map(Op::Unroot),
        1 => Just(Op::Large),
        2 => any::<bool>().prop_map(Op::Collect),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_rooted_strings_survive(ops in prop::collection::vec(op(), 1..48)) {
        let counting = Arc::new(CountingStorageProvider::new(Arc::new(
            MallocStorageProvider::new(1 << 16).unwrap(),
        )));
        let mut heap = Heap::new(GcConfig::default(), counting.clone()).unwrap();
        let mut rooted: Vec<(RootId, String)> = Vec::new();

        for op in ops {
            match op {
                Op::RootedString(text) => {
                    let s = heap.alloc_string(&text).unwrap();
                    rooted.push((heap.add_root(s), text));
                }
                Op::Garbage(n) => {
                    for _ in 0..n {
                        heap.alloc_object(None).unwrap();
                    }
                }
                Op::Unroot(i) => {
                    if !rooted.is_empty() {
                        let (id, _) = rooted.swap_remove(i % rooted.len());
                        prop_assert!(heap.remove_root(id).is_some());
                    }
                }
                Op::Large => {
                    heap.alloc_array_storage(&vec![None; 1100]).unwrap();
                }
                Op::Collect(full) => {
                    heap.collect(if full { GcKind::Full } else { GcKind::Young });
                }
            }
            prop_assert_eq!(counting.num_live(), heap.info().segments);
            prop_assert_eq!(heap.info().roots, rooted.len());
        }

        for (id, text) in &rooted {
            let s = heap.root(*id).unwrap();
            prop_assert_eq!(&heap.string_contents(s), text);
        }
        heap.collect(GcKind::Full);
        for (id, text) in &rooted {
            let s = heap.root(*id).unwrap();
            prop_assert_eq!(&heap.string_contents(s), text);
        }

        drop(heap);
        prop_assert_eq!(counting.num_live(), 0);
    }
}
