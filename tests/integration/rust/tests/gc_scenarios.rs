//! Collector Scenario Tests
//!
//! End-to-end scenarios over the public heap API: object graphs spanning
//! both generations, native resources, domains, weak references and
//! incremental marking.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use memory_manager::{
    CellHandle, CellKind, Domain, FinalizerError, GcConfig, GcKind, Heap, IncrementalConfig,
    NativeResource, RootAcceptor, RootProvider, RuntimeModule, WeakRef, WeakRefAcceptor,
};
use storage_provider::MallocStorageProvider;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn heap(config: GcConfig) -> Heap {
    init_logging();
    let provider = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
    Heap::new(config, provider).unwrap()
}

/// Counts its own releases.
struct Tracked(Rc<Cell<usize>>);

impl NativeResource for Tracked {
    fn release(self: Box<Self>) -> Result<(), FinalizerError> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

/// Test: 1000 finalizable cells, each released exactly once over the heap's
/// lifetime whether it died young, died old or survived to teardown
#[test]
fn test_every_resource_released_exactly_once() {
    let released = Rc::new(Cell::new(0));
    {
        let mut heap = heap(GcConfig::default());
        let mut roots = Vec::new();
        for i in 0..1000 {
            let host = heap
                .alloc_host_object(None, Tracked(released.clone()))
                .unwrap();
            if i % 3 == 0 {
                roots.push(heap.add_root(host));
            }
        }
        heap.collect(GcKind::Young);
        assert_eq!(released.get(), 666);

        for id in roots.drain(..100) {
            heap.remove_root(id);
        }
        heap.collect(GcKind::Full);
        assert_eq!(released.get(), 766);
        heap.collect(GcKind::Full);
        assert_eq!(released.get(), 766);
        assert_eq!(heap.info().native_resources, 234);
    }
    assert_eq!(released.get(), 1000);
}

/// Test: a domain with three modules runs each delete hook once
#[test]
fn test_domain_modules_deleted_once() {
    let mut heap = heap(GcConfig::default());
    let deleted = Rc::new(RefCell::new(Vec::new()));
    let domain = Domain::create(&mut heap).unwrap();
    let id = heap.add_root(domain);
    for i in 1..=3 {
        let log = deleted.clone();
        let module = RuntimeModule::new(i, format!("lib{}.js", i), vec![i as u8; 32])
            .with_delete_hook(move |id| log.borrow_mut().push(id));
        Domain::add_module(&mut heap, domain, module);
    }

    for _ in 0..3 {
        heap.collect(GcKind::Young);
        heap.collect(GcKind::Full);
    }
    assert!(deleted.borrow().is_empty());
    let domain = heap.root(id).unwrap();
    Domain::with_modules(&heap, domain, |modules| {
        assert!(modules.iter().all(|m| m.domain(&heap) == Some(domain)));
    });

    heap.remove_root(id);
    heap.collect(GcKind::Full);
    heap.collect(GcKind::Full);
    let mut ids = deleted.borrow().clone();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
}

/// Interpreter-like stack holding strong registers and weak handles.
#[derive(Default)]
struct Stack {
    registers: Vec<CellHandle>,
    weak: Vec<WeakRef>,
}

struct StackRoots(Rc<RefCell<Stack>>);

impl RootProvider for StackRoots {
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

/// Test: weak handles follow strongly reachable targets and are cleared
/// for targets reachable only weakly
#[test]
fn test_weak_versus_strong_reachability() {
    let mut heap = heap(GcConfig::default());
    let stack = Rc::new(RefCell::new(Stack::default()));
    heap.set_root_provider(Box::new(StackRoots(stack.clone())));

    for i in 0..20 {
        let s = heap.alloc_string(&format!("value {}", i)).unwrap();
        let weak = heap.create_weak(s);
        let mut stack = stack.borrow_mut();
        stack.weak.push(weak);
        if i % 2 == 0 {
            stack.registers.push(s);
        }
    }
    heap.collect(GcKind::Young);
    heap.collect(GcKind::Full);

    let stack = stack.borrow();
    for (i, weak) in stack.weak.iter().enumerate() {
        match heap.get_weak(weak) {
            Some(s) => {
                assert_eq!(i % 2, 0);
                assert_eq!(s, stack.registers[i / 2]);
                assert_eq!(heap.string_contents(s), format!("value {}", i));
            }
            None => assert_eq!(i % 2, 1),
        }
    }
    assert_eq!(heap.info().weak_refs, 20);
}

/// Builds a graph, drops part of it, and reports the surviving strings.
fn run_program(heap: &mut Heap, incremental: bool) -> BTreeSet<String> {
    let mut roots = Vec::new();
    for i in 0..400 {
        let name = heap.alloc_string(&format!("node {}", i)).unwrap();
        let node = heap.alloc_array(None, &[Some(name)]).unwrap();
        roots.push(heap.add_root(node));
        if i % 50 == 49 {
            heap.collect(GcKind::Young);
        }
    }
    for (i, id) in roots.iter().enumerate() {
        if i % 4 != 0 {
            heap.remove_root(*id);
        }
    }
    if incremental {
        assert!(heap.start_incremental_collection());
        while !heap.incremental_step() {
            heap.alloc_object(None).unwrap();
        }
        heap.finish_incremental_collection();
    }
    heap.collect(GcKind::Full);

    let mut cells = Vec::new();
    heap.for_each_cell(|cell, kind, _| {
        if kind == CellKind::DynamicAsciiString {
            cells.push(cell);
        }
    });
    cells.into_iter().map(|cell| heap.string_contents(cell)).collect()
}

/// Test: incremental and stop-the-world collection keep the same cells
#[test]
fn test_incremental_matches_stop_the_world() {
    let mut stw = heap(GcConfig::default());
    let mut incremental = heap(GcConfig::default().with_incremental(IncrementalConfig {
        enabled: true,
        max_cells_per_slice: 8,
        ..Default::default()
    }));

    let a = run_program(&mut stw, false);
    let b = run_program(&mut incremental, true);
    assert_eq!(a.len(), 100);
    assert_eq!(a, b);
    assert!(a.contains("node 0"));
    assert!(!a.contains("node 1"));
    assert_eq!(stw.cumulative_stats().incremental.cycles, 0);
    assert!(incremental.cumulative_stats().incremental.slices > 1);
}

/// Test: repeated full collections leave the heap unchanged
#[test]
fn test_full_collection_is_idempotent() {
    let mut heap = heap(GcConfig::default());
    let mut elements = Vec::new();
    for i in 0..64 {
        elements.push(Some(heap.alloc_string(&format!("element {}", i)).unwrap()));
    }
    let array = heap.alloc_array(None, &elements).unwrap();
    heap.add_root(array);
    heap.alloc_array_buffer(None, 4096).unwrap();

    heap.collect(GcKind::Full);
    let first = heap.info();
    let mut cells = Vec::new();
    heap.for_each_cell(|cell, kind, size| cells.push((cell, kind, size)));

    for _ in 0..3 {
        heap.collect(GcKind::Full);
    }
    let mut again = Vec::new();
    heap.for_each_cell(|cell, kind, size| again.push((cell, kind, size)));
    assert_eq!(cells, again);
    let last = heap.info();
    assert_eq!(first.allocated_bytes, last.allocated_bytes);
    assert_eq!(first.segments, last.segments);
    assert_eq!(first.native_resources, last.native_resources);
}
